//! Runs a `FrameTimingLoop` on its own thread and mediates operator access.
//!
//! The supervisor is the only way other threads touch a running loop: all
//! requests travel over a command channel and take effect between cycles.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use avbot_traits::{Camera, Maneuver};
use crossbeam_channel as xch;

use crate::calibration::CalibrationBox;
use crate::control_loop::{FrameTimingLoop, LoopCommand, LoopEvent, LoopMode, ManeuverHandle};
use crate::error::ActivationError;

pub struct Supervisor {
    commands: xch::Sender<LoopCommand>,
    events: xch::Receiver<LoopEvent>,
    engaged: Arc<AtomicBool>,
    maneuver: ManeuverHandle,
    calibration: Arc<CalibrationBox>,
    join: Option<JoinHandle<FrameTimingLoop>>,
}

impl Supervisor {
    pub fn spawn(mut lp: FrameTimingLoop) -> Self {
        let (commands, rx) = xch::unbounded();
        let events = lp.events();
        let engaged = lp.engaged_flag();
        let maneuver = lp.maneuver();
        let calibration = lp.calibration();
        let join = std::thread::Builder::new()
            .name("control-loop".into())
            .spawn(move || {
                lp.run(&rx);
                lp
            });
        let join = match join {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn control loop thread");
                None
            }
        };
        Self {
            commands,
            events,
            engaged,
            maneuver,
            calibration,
            join,
        }
    }

    pub fn events(&self) -> &xch::Receiver<LoopEvent> {
        &self.events
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    pub fn set_maneuver(&self, m: Maneuver) {
        self.maneuver.set(m);
    }

    pub fn calibration(&self) -> &Arc<CalibrationBox> {
        &self.calibration
    }

    fn request<T>(
        &self,
        make: impl FnOnce(xch::Sender<T>) -> LoopCommand,
    ) -> Option<T> {
        let (tx, rx) = xch::bounded(1);
        self.commands.send(make(tx)).ok()?;
        rx.recv().ok()
    }

    pub fn set_mode(&self, mode: LoopMode) -> Result<(), ActivationError> {
        self.request(|tx| LoopCommand::SetMode(mode, tx))
            .unwrap_or(Err(ActivationError::LoopStopped))
    }

    /// Blocks until the loop has run the engage sequence or refused.
    pub fn engage(&self) -> Result<(), ActivationError> {
        self.request(LoopCommand::Engage)
            .unwrap_or(Err(ActivationError::LoopStopped))
    }

    pub fn disengage(&self) {
        let _ = self.commands.send(LoopCommand::Disengage);
    }

    /// Change the actuator port. Refused while actuation is active.
    ///
    /// Returns whether the new link opened.
    pub fn set_port(&self, port: Option<String>) -> Result<bool, ActivationError> {
        if self.is_engaged() {
            return Err(ActivationError::AlreadyEngaged);
        }
        self.request(|tx| LoopCommand::SetPort(port, tx))
            .ok_or(ActivationError::LoopStopped)
    }

    pub fn assign_camera(
        &self,
        pos: usize,
        device: impl Into<String>,
        camera: Box<dyn Camera + Send>,
    ) {
        let _ = self.commands.send(LoopCommand::AssignCamera {
            pos,
            device: device.into(),
            camera,
        });
    }

    pub fn release_camera(&self, pos: usize) {
        let _ = self.commands.send(LoopCommand::ReleaseCamera(pos));
    }

    /// Ask the agent for diagnostic images; they arrive as `LoopEvent::Render`.
    pub fn request_render(&self) {
        let _ = self.commands.send(LoopCommand::Render);
    }

    /// Stop the loop after its current cycle and wait for it.
    ///
    /// Returns the loop so its final state can be inspected.
    pub fn stop(mut self) -> Option<FrameTimingLoop> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<FrameTimingLoop> {
        let handle = self.join.take()?;
        let _ = self.commands.send(LoopCommand::Stop);
        match handle.join() {
            Ok(lp) => Some(lp),
            Err(e) => {
                tracing::warn!(?e, "control loop thread panicked");
                None
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
