//! Fixed-period control loop: acquire frames, decide, calibrate, actuate.
//!
//! Each cycle lasts at least `delta_frame`. A cycle whose processing runs
//! over is reported as an overrun, never shortened or skipped. Operator
//! commands are applied between cycles only.
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use avbot_traits::{Agent, Camera, Clock, Frame, FrameSet, Maneuver, MonotonicClock, RawAction};
use crossbeam_channel as xch;

use crate::actuator::{Delivery, SerialActuatorChannel};
use crate::agent::LoadedAgent;
use crate::calibration::CalibrationBox;
use crate::error::{ActivationError, AvError, BuildError, DisengageCause, Result};
use crate::hw_error::map_hw_error;
use crate::manual::ManualCommand;
use crate::rig::CameraRig;
use crate::safety::{BlankDetector, SafetyMonitor};
use crate::util::DEFAULT_DELTA_FRAME;

/// Which source produces this cycle's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Idle,
    ManualOverride(ManualCommand),
    AgentControlled,
    CalibrationProbe(u8),
}

impl LoopMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ManualOverride(_) => "manual",
            Self::AgentControlled => "agent",
            Self::CalibrationProbe(_) => "probe",
        }
    }
}

/// Fixed action for a calibration probe profile.
pub fn probe_action(profile: u8) -> RawAction {
    let (steer, throttle) = match profile {
        2 => (0.6, 0.3),
        3 => (-0.6, 0.3),
        _ => (0.0, 0.35),
    };
    RawAction::new(steer, throttle, false)
}

/// Per-cycle telemetry, published whether or not actuation is active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub cycle: u64,
    pub mode: &'static str,
    pub steer: f32,
    pub throttle: f32,
    pub brake: bool,
    pub proc_time: Duration,
    pub cycle_time: Duration,
    pub engaged: bool,
    pub overrun: bool,
}

impl Telemetry {
    /// Zeroed state published when the loop stops.
    pub fn cleared(cycle: u64) -> Self {
        Self {
            cycle,
            mode: LoopMode::Idle.label(),
            steer: 0.0,
            throttle: 0.0,
            brake: false,
            proc_time: Duration::ZERO,
            cycle_time: Duration::ZERO,
            engaged: false,
            overrun: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoopEvent {
    Telemetry(Telemetry),
    Engaged { test_mode: bool },
    Disengaged(DisengageCause),
    /// A write failed and the actuator link was closed.
    LinkFailed { port: Option<String> },
    ModeChanged(LoopMode),
    Render(Vec<Frame>),
    Stopped,
}

/// Operator requests, applied at the top of the next cycle.
pub enum LoopCommand {
    SetMode(LoopMode, xch::Sender<std::result::Result<(), ActivationError>>),
    Engage(xch::Sender<std::result::Result<(), ActivationError>>),
    Disengage,
    /// Replies whether the link opened.
    SetPort(Option<String>, xch::Sender<bool>),
    AssignCamera {
        pos: usize,
        device: String,
        camera: Box<dyn Camera + Send>,
    },
    ReleaseCamera(usize),
    Render,
    Stop,
}

/// Operator maneuver, shared with whoever sets it.
#[derive(Debug, Clone, Default)]
pub struct ManeuverHandle(Arc<AtomicU8>);

impl ManeuverHandle {
    pub fn set(&self, m: Maneuver) {
        self.0.store(m.code(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Maneuver {
        Maneuver::try_from(self.0.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

pub struct FrameTimingLoop {
    rig: CameraRig,
    agent: Option<Box<dyn Agent + Send>>,
    calibration: Arc<CalibrationBox>,
    channel: SerialActuatorChannel,
    safety: SafetyMonitor,
    clock: Arc<dyn Clock + Send + Sync>,
    delta_frame: Duration,
    engage_settle: Duration,
    brake_hold: Duration,
    mode: LoopMode,
    maneuver: ManeuverHandle,
    engaged: Arc<AtomicBool>,
    prior: RawAction,
    cycle: u64,
    events_tx: xch::Sender<LoopEvent>,
    events_rx: xch::Receiver<LoopEvent>,
}

impl std::fmt::Debug for FrameTimingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTimingLoop")
            .field("mode", &self.mode)
            .field("engaged", &self.is_engaged())
            .field("delta_frame", &self.delta_frame)
            .field("cycle", &self.cycle)
            .field("rig", &self.rig)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl FrameTimingLoop {
    pub fn builder() -> FrameTimingLoopBuilder<Missing, Missing> {
        FrameTimingLoopBuilder::default()
    }

    pub fn events(&self) -> xch::Receiver<LoopEvent> {
        self.events_rx.clone()
    }

    pub fn engaged_flag(&self) -> Arc<AtomicBool> {
        self.engaged.clone()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    pub fn maneuver(&self) -> ManeuverHandle {
        self.maneuver.clone()
    }

    pub fn calibration(&self) -> Arc<CalibrationBox> {
        self.calibration.clone()
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn delta_frame(&self) -> Duration {
        self.delta_frame
    }

    pub fn channel(&self) -> &SerialActuatorChannel {
        &self.channel
    }

    pub fn rig_mut(&mut self) -> &mut CameraRig {
        &mut self.rig
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    fn publish(&self, ev: LoopEvent) {
        match self.events_tx.try_send(ev) {
            Ok(()) => {}
            Err(xch::TrySendError::Full(ev)) => {
                // Observer is behind: drop the oldest event to keep the newest.
                let _ = self.events_rx.try_recv();
                let _ = self.events_tx.try_send(ev);
            }
            Err(xch::TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn set_mode(&mut self, mode: LoopMode) -> std::result::Result<(), ActivationError> {
        if mode == LoopMode::AgentControlled && self.agent.is_none() {
            return Err(ActivationError::NoAgent);
        }
        if mode == LoopMode::Idle && self.is_engaged() {
            self.disengage(DisengageCause::Operator);
        }
        if self.mode != mode {
            tracing::info!(from = self.mode.label(), to = mode.label(), "mode changed");
            self.mode = mode;
            self.publish(LoopEvent::ModeChanged(mode));
        }
        Ok(())
    }

    pub fn set_port(&mut self, port: Option<&str>) -> bool {
        match port {
            Some(p) => self.channel.set_port(p),
            None => {
                self.channel.clear_port();
                false
            }
        }
    }

    /// Start actuation after checking every precondition.
    pub fn engage(&mut self) -> std::result::Result<(), ActivationError> {
        if self.is_engaged() {
            return Err(ActivationError::AlreadyEngaged);
        }
        match self.mode {
            LoopMode::Idle => return Err(ActivationError::Idle),
            LoopMode::AgentControlled if self.agent.is_none() => {
                return Err(ActivationError::NoAgent);
            }
            _ => {}
        }
        if let Some(pos) = self.rig.unassigned() {
            return Err(ActivationError::CameraUnassigned(pos));
        }
        let frames = self.rig.read_all();
        self.safety.check_frame(frames.primary(), false);
        if self.safety.camera_blanked() {
            return Err(ActivationError::CameraBlank);
        }
        if self.mode == LoopMode::AgentControlled
            && let Some(agent) = self.agent.as_mut()
        {
            agent
                .reset(&frames)
                .map_err(|e| ActivationError::AgentReset(e.to_string()))?;
        }

        if let Some(port) = self.channel.port().map(str::to_owned)
            && !self.channel.is_connected()
        {
            self.channel.set_port(&port);
        }
        let test_mode = !self.channel.is_connected();
        if test_mode {
            tracing::warn!("no actuator link; engaging in test mode");
        }

        let (steer, throttle) = self.calibration.neutral();
        self.send(steer, throttle, false);
        self.clock.sleep(self.engage_settle);

        if let Some(port) = self.channel.port().filter(|_| !test_mode) {
            let port = port.to_owned();
            self.safety.arm_link(&port);
        }
        self.prior = RawAction::ZERO;
        self.engaged.store(true, Ordering::Release);
        tracing::info!(mode = self.mode.label(), test_mode, "actuation engaged");
        self.publish(LoopEvent::Engaged { test_mode });
        Ok(())
    }

    /// Stop actuation: brake, hold, release. No-op when not engaged.
    ///
    /// Observers hear about the disengage before the brake sequence runs. A
    /// lost link skips the hold, since nothing can reach the actuator.
    pub fn disengage(&mut self, cause: DisengageCause) {
        if !self.engaged.swap(false, Ordering::AcqRel) {
            return;
        }
        self.safety.disarm_link();
        if cause == DisengageCause::LinkLost {
            self.channel.close();
        }
        self.safety.mark_blanked();
        self.prior = RawAction::ZERO;
        self.mode = LoopMode::Idle;
        if cause.is_emergency() {
            tracing::error!(%cause, "emergency disengage");
        } else {
            tracing::info!(%cause, "actuation disengaged");
        }
        self.publish(LoopEvent::Disengaged(cause));

        if !self.channel.is_connected() {
            tracing::debug!("no actuator link; skipping brake hold");
            return;
        }
        let (steer, throttle) = self.calibration.neutral();
        self.send(steer, throttle, true);
        self.clock.sleep(self.brake_hold);
        self.send(steer, throttle, false);
    }

    fn send(&mut self, steer: f32, throttle: f32, brake: bool) {
        match self.channel.send(steer, throttle, brake) {
            Ok(Delivery::LinkFailed) => self.publish(LoopEvent::LinkFailed {
                port: self.channel.port().map(str::to_owned),
            }),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "actuator command rejected"),
        }
    }

    fn decide(&mut self, frames: &FrameSet) -> RawAction {
        match self.mode {
            LoopMode::Idle => RawAction::ZERO,
            LoopMode::ManualOverride(cmd) => cmd.raw_action(),
            LoopMode::CalibrationProbe(profile) => probe_action(profile),
            LoopMode::AgentControlled => {
                let Some(agent) = self.agent.as_mut() else {
                    return RawAction::ZERO;
                };
                match agent.decide(frames, self.prior.pair(), self.maneuver.get()) {
                    Ok(a) => a,
                    Err(e) => {
                        let err = AvError::Agent(map_hw_error(e.as_ref()).to_string());
                        tracing::warn!(error = %err, cycle = self.cycle, "decision failed; using zero action");
                        RawAction::ZERO
                    }
                }
            }
        }
    }

    /// Run one cycle and return its telemetry.
    pub fn step(&mut self) -> Telemetry {
        let t0 = self.clock.now();
        self.cycle += 1;

        if let Some(cause) = self.safety.poll_link() {
            self.disengage(cause);
        }
        let frames = self.rig.read_all();
        if let Some(cause) = self.safety.check_frame(frames.primary(), self.is_engaged()) {
            self.disengage(cause);
        }

        let action = self.decide(&frames);
        let proc_time = self.clock.since(t0);
        if proc_time < self.delta_frame {
            self.clock.sleep(self.delta_frame - proc_time);
        }
        let effective = proc_time.max(self.delta_frame);

        let engaged = self.is_engaged();
        let (steer, throttle) = if self.mode == LoopMode::Idle {
            (0.0, 0.0)
        } else {
            self.calibration
                .calibrate(action.steer, action.throttle, effective)
        };
        // Only a literal manual packet carries a brake bit to the actuator.
        let brake = action.brake && matches!(self.mode, LoopMode::ManualOverride(_));
        if engaged {
            self.send(steer, throttle, brake);
        }
        self.prior = action;

        let cycle_time = self.clock.since(t0);
        let overrun = proc_time > self.delta_frame;
        if overrun {
            tracing::debug!(cycle = self.cycle, ?proc_time, "cycle overran its period");
        }
        let t = Telemetry {
            cycle: self.cycle,
            mode: self.mode.label(),
            steer,
            throttle,
            brake,
            proc_time,
            cycle_time,
            engaged,
            overrun,
        };
        self.publish(LoopEvent::Telemetry(t));
        t
    }

    fn apply(&mut self, cmd: LoopCommand) -> bool {
        match cmd {
            LoopCommand::SetMode(mode, reply) => {
                let _ = reply.send(self.set_mode(mode));
            }
            LoopCommand::Engage(reply) => {
                let res = self.engage();
                if let Err(e) = &res {
                    tracing::warn!(reason = %e, "engage refused");
                }
                let _ = reply.send(res);
            }
            LoopCommand::Disengage => self.disengage(DisengageCause::Operator),
            LoopCommand::SetPort(port, reply) => {
                let _ = reply.send(self.set_port(port.as_deref()));
            }
            LoopCommand::AssignCamera {
                pos,
                device,
                camera,
            } => {
                if let Err(e) = self.rig.assign(pos, device, camera) {
                    tracing::warn!(error = %e, "camera assignment rejected");
                }
            }
            LoopCommand::ReleaseCamera(pos) => self.rig.release(pos),
            LoopCommand::Render => {
                let images = self.agent.as_ref().map(|a| a.render()).unwrap_or_default();
                self.publish(LoopEvent::Render(images));
            }
            LoopCommand::Stop => return false,
        }
        true
    }

    /// Cycle until `Stop` arrives or every command sender is gone.
    pub fn run(&mut self, commands: &xch::Receiver<LoopCommand>) {
        tracing::info!(delta_frame = ?self.delta_frame, "control loop started");
        'outer: loop {
            loop {
                match commands.try_recv() {
                    Ok(cmd) => {
                        if !self.apply(cmd) {
                            break 'outer;
                        }
                    }
                    Err(xch::TryRecvError::Empty) => break,
                    Err(xch::TryRecvError::Disconnected) => break 'outer,
                }
            }
            self.step();
        }
        self.shutdown();
    }

    /// Disengage if needed and publish the cleared state.
    pub fn shutdown(&mut self) {
        self.disengage(DisengageCause::Shutdown);
        self.channel.close();
        self.publish(LoopEvent::Telemetry(Telemetry::cleared(self.cycle)));
        self.publish(LoopEvent::Stopped);
        tracing::info!(cycles = self.cycle, "control loop stopped");
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `FrameTimingLoop`. `build()` needs a rig and a channel.
pub struct FrameTimingLoopBuilder<R, C> {
    rig: Option<CameraRig>,
    channel: Option<SerialActuatorChannel>,
    agent: Option<Box<dyn Agent + Send>>,
    native_bounds: Option<(f32, f32)>,
    agent_geometry: Option<(usize, u32, u32)>,
    agent_delta: Option<Duration>,
    delta_frame: Option<Duration>,
    calibration: Option<Arc<CalibrationBox>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    safety: Option<SafetyMonitor>,
    engage_settle: Duration,
    brake_hold: Duration,
    telemetry_capacity: usize,
    _r: PhantomData<R>,
    _c: PhantomData<C>,
}

impl Default for FrameTimingLoopBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            rig: None,
            channel: None,
            agent: None,
            native_bounds: None,
            agent_geometry: None,
            agent_delta: None,
            delta_frame: None,
            calibration: None,
            clock: None,
            safety: None,
            engage_settle: Duration::from_millis(400),
            brake_hold: Duration::from_secs(2),
            telemetry_capacity: 64,
            _r: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<R, C> FrameTimingLoopBuilder<R, C> {
    fn retype<R2, C2>(self) -> FrameTimingLoopBuilder<R2, C2> {
        FrameTimingLoopBuilder {
            rig: self.rig,
            channel: self.channel,
            agent: self.agent,
            native_bounds: self.native_bounds,
            agent_geometry: self.agent_geometry,
            agent_delta: self.agent_delta,
            delta_frame: self.delta_frame,
            calibration: self.calibration,
            clock: self.clock,
            safety: self.safety,
            engage_settle: self.engage_settle,
            brake_hold: self.brake_hold,
            telemetry_capacity: self.telemetry_capacity,
            _r: PhantomData,
            _c: PhantomData,
        }
    }

    pub fn rig(mut self, rig: CameraRig) -> FrameTimingLoopBuilder<Set, C> {
        self.rig = Some(rig);
        self.retype()
    }

    pub fn channel(mut self, channel: SerialActuatorChannel) -> FrameTimingLoopBuilder<R, Set> {
        self.channel = Some(channel);
        self.retype()
    }

    /// Use a loaded agent; its descriptor supplies native bounds, camera
    /// geometry and the default cycle period.
    pub fn agent(mut self, loaded: LoadedAgent) -> Self {
        let d = &loaded.descriptor;
        self.native_bounds = Some((d.action_bounds.max_steer, d.action_bounds.max_throttle()));
        self.agent_geometry = Some((d.cameras, d.frame_width, d.frame_height));
        self.agent_delta = crate::util::positive_secs(d.delta_frame);
        self.agent = Some(loaded.agent);
        self
    }

    /// Use an external agent with the given native bounds.
    pub fn custom_agent(
        mut self,
        agent: Box<dyn Agent + Send>,
        max_steer: f32,
        max_throttle: f32,
    ) -> Self {
        self.native_bounds = Some((max_steer, max_throttle));
        self.agent = Some(agent);
        self
    }

    /// Overrides the agent descriptor's period.
    pub fn delta_frame(mut self, d: Duration) -> Self {
        self.delta_frame = Some(d);
        self
    }

    pub fn calibration(mut self, cal: Arc<CalibrationBox>) -> Self {
        self.calibration = Some(cal);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn safety(mut self, safety: SafetyMonitor) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn engage_settle(mut self, d: Duration) -> Self {
        self.engage_settle = d;
        self
    }

    pub fn brake_hold(mut self, d: Duration) -> Self {
        self.brake_hold = d;
        self
    }

    pub fn telemetry_capacity(mut self, n: usize) -> Self {
        self.telemetry_capacity = n;
        self
    }

    /// Validate and construct, reporting missing parts as `BuildError`.
    pub fn try_build(self) -> Result<FrameTimingLoop> {
        let rig = self.rig.ok_or(BuildError::MissingRig)?;
        let channel = self.channel.ok_or(BuildError::MissingChannel)?;
        if rig.is_empty() {
            return Err(BuildError::InvalidConfig("camera rig has no slots").into());
        }
        if let Some((cameras, w, h)) = self.agent_geometry {
            if cameras != rig.len() {
                return Err(BuildError::CameraCount {
                    expected: cameras,
                    actual: rig.len(),
                }
                .into());
            }
            if (w, h) != rig.resolution() {
                return Err(BuildError::InvalidConfig(
                    "rig resolution does not match agent descriptor",
                )
                .into());
            }
        }
        let delta_frame = self
            .delta_frame
            .or(self.agent_delta)
            .unwrap_or(DEFAULT_DELTA_FRAME);
        if delta_frame.is_zero() {
            return Err(BuildError::InvalidConfig("delta_frame must be > 0").into());
        }
        if self.telemetry_capacity == 0 {
            return Err(BuildError::InvalidConfig("telemetry capacity must be >= 1").into());
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let calibration = self
            .calibration
            .unwrap_or_else(|| Arc::new(CalibrationBox::new(clock.clone())));
        if let Some((max_steer, max_throttle)) = self.native_bounds {
            calibration.apply_default_limits(max_steer, max_throttle)?;
        }
        let safety = self
            .safety
            .unwrap_or_else(|| SafetyMonitor::new(BlankDetector::default(), 1));
        let (events_tx, events_rx) = xch::bounded(self.telemetry_capacity);

        Ok(FrameTimingLoop {
            rig,
            agent: self.agent,
            calibration,
            channel,
            safety,
            clock,
            delta_frame,
            engage_settle: self.engage_settle,
            brake_hold: self.brake_hold,
            mode: LoopMode::Idle,
            maneuver: ManeuverHandle::default(),
            engaged: Arc::new(AtomicBool::new(false)),
            prior: RawAction::ZERO,
            cycle: 0,
            events_tx,
            events_rx,
        })
    }
}

impl FrameTimingLoopBuilder<Set, Set> {
    pub fn build(self) -> Result<FrameTimingLoop> {
        self.try_build()
    }
}
