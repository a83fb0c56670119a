//! Literal manual commands and the manual controller session.
//!
//! Manual driving works in the byte domain: each command is a fixed packet,
//! calibrated against the persisted [`CalibrationRecord`] and resent every
//! `delay_time` seconds until the session ends with a brake sequence.
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use avbot_config::CalibrationRecord;
use avbot_config::calibration::STEER_MIDPOINT;
use avbot_traits::{Clock, Maneuver, RawAction};
use crossbeam_channel as xch;

use crate::actuator::{ActuatorCommand, Delivery, SerialActuatorChannel};
use crate::error::AvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManualCommand {
    MostLeft,
    Left,
    BitLeft,
    Forward,
    BitRight,
    Right,
    MostRight,
    Ready,
    Brake,
}

impl ManualCommand {
    pub const ALL: [ManualCommand; 9] = [
        Self::MostLeft,
        Self::Left,
        Self::BitLeft,
        Self::Forward,
        Self::BitRight,
        Self::Right,
        Self::MostRight,
        Self::Ready,
        Self::Brake,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MostLeft => "most_left",
            Self::Left => "left",
            Self::BitLeft => "bit_left",
            Self::Forward => "forward",
            Self::BitRight => "bit_right",
            Self::Right => "right",
            Self::MostRight => "most_right",
            Self::Ready => "ready",
            Self::Brake => "brake",
        }
    }

    /// Uncalibrated wire packet.
    pub fn packet(self) -> [u8; 6] {
        match self {
            Self::MostLeft => [36, 0, 60, 0, 0, 64],
            Self::Left => [36, 55, 60, 0, 0, 64],
            Self::BitLeft => [36, 109, 70, 0, 0, 64],
            Self::Forward => [36, 128, 90, 0, 0, 64],
            Self::BitRight => [36, 145, 70, 0, 0, 64],
            Self::Right => [36, 199, 60, 0, 0, 64],
            Self::MostRight => [36, 255, 60, 0, 0, 64],
            Self::Ready => [36, 127, 0, 0, 0, 64],
            Self::Brake => [36, 127, 0, 255, 0, 64],
        }
    }

    fn command(self) -> ActuatorCommand {
        let [_, steer, throttle, brake, _, _] = self.packet();
        ActuatorCommand {
            steer,
            throttle,
            brake: brake != 0,
        }
    }

    pub fn from_maneuver(m: Maneuver) -> Self {
        match m {
            Maneuver::Forward => Self::Forward,
            Maneuver::Left => Self::Left,
            Maneuver::Right => Self::Right,
        }
    }

    /// The packet decoded into nominal units.
    pub fn raw_action(self) -> RawAction {
        self.command().decode()
    }

    /// Apply the byte-domain calibration record.
    pub fn calibrated(self, rec: &CalibrationRecord) -> ActuatorCommand {
        let raw = self.command();
        let mid = f32::from(STEER_MIDPOINT);
        let steer = f32::from(rec.middle_steer)
            + (f32::from(raw.steer) - mid) * f32::from(rec.steer_limit) / mid;
        let throttle = f32::from(raw.throttle) * f32::from(rec.throttle_limit) / 255.0;
        ActuatorCommand {
            steer: steer.round_ties_even().clamp(0.0, 255.0) as u8,
            throttle: throttle.round_ties_even().clamp(0.0, 255.0) as u8,
            brake: raw.brake,
        }
    }
}

impl FromStr for ManualCommand {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| AvError::Config(format!("unknown manual command '{s}'")))
    }
}

impl std::fmt::Display for ManualCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a manual session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualSummary {
    pub sent: u64,
    pub offline: u64,
    pub link_failed: bool,
}

/// Drives the vehicle from operator commands in the byte domain.
pub struct ManualDriver<'a> {
    channel: &'a mut SerialActuatorChannel,
    record: CalibrationRecord,
    clock: Arc<dyn Clock + Send + Sync>,
    brake_hold: Duration,
}

impl<'a> ManualDriver<'a> {
    pub fn new(
        channel: &'a mut SerialActuatorChannel,
        record: CalibrationRecord,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            channel,
            record,
            clock,
            brake_hold: Duration::from_secs(3),
        }
    }

    pub fn with_brake_hold(mut self, hold: Duration) -> Self {
        self.brake_hold = hold;
        self
    }

    fn send(&mut self, cmd: ManualCommand, summary: &mut ManualSummary) {
        match self.channel.send_command(cmd.calibrated(&self.record)) {
            Delivery::Written => summary.sent += 1,
            Delivery::Offline => summary.offline += 1,
            Delivery::LinkFailed => {
                summary.link_failed = true;
                summary.offline += 1;
            }
        }
    }

    /// Resend the latest command every `delay_time` until `running` clears or
    /// the command sender goes away, then brake.
    ///
    /// The session starts from `Ready`; queued commands are coalesced so only
    /// the newest one is sent each period.
    pub fn run(mut self, commands: &xch::Receiver<ManualCommand>, running: &AtomicBool) -> ManualSummary {
        let period = Duration::try_from_secs_f32(self.record.delay_time).unwrap_or_default();
        let mut current = ManualCommand::Ready;
        let mut summary = ManualSummary::default();
        tracing::info!(?period, record = ?self.record, "manual session started");
        while running.load(Ordering::Relaxed) {
            let mut finished = false;
            loop {
                match commands.try_recv() {
                    Ok(cmd) => {
                        if cmd != current {
                            tracing::debug!(command = %cmd, "manual command");
                        }
                        current = cmd;
                    }
                    Err(xch::TryRecvError::Empty) => break,
                    Err(xch::TryRecvError::Disconnected) => {
                        finished = true;
                        break;
                    }
                }
            }
            self.send(current, &mut summary);
            if finished {
                break;
            }
            self.clock.sleep(period);
        }
        self.brake(&mut summary);
        tracing::info!(sent = summary.sent, offline = summary.offline, "manual session ended");
        summary
    }

    /// Brake, hold, then return to ready.
    pub fn brake(&mut self, summary: &mut ManualSummary) {
        self.send(ManualCommand::Brake, summary);
        self.clock.sleep(self.brake_hold);
        self.send(ManualCommand::Ready, summary);
    }
}
