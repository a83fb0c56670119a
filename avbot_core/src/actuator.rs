//! Actuator wire packet and the serial channel that carries it.
//!
//! Packet layout, 6 raw bytes, no framing or checksum:
//!
//! ```text
//! [0x24, steer, throttle, brake (0 | 255), 0x00, 0x40]
//! ```
use std::sync::Arc;

use avbot_traits::{BoxError, RawAction, SerialOpener, SerialPort};

use crate::error::{AvError, Result};
use crate::hw_error::map_hw_error;

pub const HEADER: u8 = 36;
pub const TRAILER: u8 = 64;
pub const PACKET_LEN: usize = 6;
const BRAKE_ON: u8 = 255;

/// Calibrated action in wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub steer: u8,
    pub throttle: u8,
    pub brake: bool,
}

impl ActuatorCommand {
    /// Quantize a calibrated action. Braking forces throttle to zero.
    ///
    /// Inputs must already be in steer [-1, 1] and throttle [0, 1].
    pub fn encode(steer: f32, throttle: f32, brake: bool) -> std::result::Result<Self, AvError> {
        if !(-1.0..=1.0).contains(&steer) {
            return Err(AvError::Domain(format!("steer {steer} outside [-1, 1]")));
        }
        if !(0.0..=1.0).contains(&throttle) {
            return Err(AvError::Domain(format!(
                "throttle {throttle} outside [0, 1]"
            )));
        }
        let steer = ((steer + 1.0) / 2.0 * 255.0).round_ties_even() as u8;
        let throttle = if brake {
            0
        } else {
            (throttle * 255.0).round_ties_even() as u8
        };
        Ok(Self {
            steer,
            throttle,
            brake,
        })
    }

    pub fn to_bytes(self) -> [u8; PACKET_LEN] {
        [
            HEADER,
            self.steer,
            self.throttle,
            if self.brake { BRAKE_ON } else { 0 },
            0,
            TRAILER,
        ]
    }

    /// Parse a wire packet, checking the constant bytes.
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> std::result::Result<Self, AvError> {
        let [header, steer, throttle, brake, reserved, trailer] = bytes;
        if header != HEADER || trailer != TRAILER || reserved != 0 {
            return Err(AvError::Domain(format!("malformed packet {bytes:?}")));
        }
        let brake = match brake {
            0 => false,
            BRAKE_ON => true,
            other => return Err(AvError::Domain(format!("brake byte {other} not 0 or 255"))),
        };
        Ok(Self {
            steer,
            throttle,
            brake,
        })
    }

    /// Back to nominal units; exact up to 8-bit quantization.
    pub fn decode(self) -> RawAction {
        RawAction {
            steer: f32::from(self.steer) / 255.0 * 2.0 - 1.0,
            throttle: f32::from(self.throttle) / 255.0,
            brake: self.brake,
        }
    }
}

/// What happened to a command handed to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Written,
    /// No link open; the command was dropped.
    Offline,
    /// The write failed and the link has been closed.
    LinkFailed,
}

/// Owns the serial connection to the actuator controller.
///
/// Opening or writing never fails the caller: a missing device leaves the
/// channel disconnected and sends become logged no-ops.
pub struct SerialActuatorChannel {
    opener: Arc<dyn SerialOpener + Send + Sync>,
    baud: u32,
    port: Option<String>,
    link: Option<Box<dyn SerialPort + Send>>,
    last: Option<ActuatorCommand>,
}

impl std::fmt::Debug for SerialActuatorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialActuatorChannel")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SerialActuatorChannel {
    pub fn new(opener: Arc<dyn SerialOpener + Send + Sync>, baud: u32) -> Self {
        Self {
            opener,
            baud,
            port: None,
            link: None,
            last: None,
        }
    }

    /// Close any open link and open `port`. Returns whether the open succeeded.
    pub fn set_port(&mut self, port: &str) -> bool {
        self.close();
        self.port = Some(port.to_string());
        match self.opener.open(port, self.baud) {
            Ok(link) => {
                tracing::info!(port, baud = self.baud, "actuator link open");
                self.link = Some(link);
                true
            }
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(port, error = %err, "actuator link unavailable");
                false
            }
        }
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            tracing::debug!(port = ?self.port, "actuator link closed");
        }
    }

    /// Forget the configured port entirely.
    pub fn clear_port(&mut self) {
        self.close();
        self.port = None;
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.last
    }

    /// Encode and transmit a calibrated action.
    ///
    /// Out-of-range inputs are a domain error; link problems are not errors.
    pub fn send(&mut self, steer: f32, throttle: f32, brake: bool) -> Result<Delivery> {
        let cmd = ActuatorCommand::encode(steer, throttle, brake)?;
        Ok(self.send_command(cmd))
    }

    pub fn send_command(&mut self, cmd: ActuatorCommand) -> Delivery {
        self.last = Some(cmd);
        let Some(link) = self.link.as_mut() else {
            tracing::trace!(?cmd, "no actuator link; command dropped");
            return Delivery::Offline;
        };
        let bytes = cmd.to_bytes();
        match write_packet(&mut **link, &bytes) {
            Ok(()) => {
                tracing::trace!(?bytes, "actuator command written");
                Delivery::Written
            }
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(port = ?self.port, error = %err, "actuator write failed; link closed");
                self.link = None;
                Delivery::LinkFailed
            }
        }
    }
}

fn write_packet(link: &mut (dyn SerialPort + Send), bytes: &[u8]) -> std::result::Result<(), BoxError> {
    link.write_all(bytes)?;
    link.flush()?;
    link.clear_input()
}

impl Drop for SerialActuatorChannel {
    fn drop(&mut self) {
        self.close();
    }
}
