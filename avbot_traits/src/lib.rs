pub mod action;
pub mod clock;
pub mod frame;

pub use action::{Maneuver, RawAction};
pub use clock::{Clock, MonotonicClock};
pub use frame::{Frame, FrameSet};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub trait Camera {
    /// Grab the next frame, waiting at most `timeout`.
    fn read(&mut self, timeout: std::time::Duration) -> Result<Frame, BoxError>;
}

/// An open serial connection.
pub trait SerialPort {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError>;
    fn flush(&mut self) -> Result<(), BoxError>;
    /// Discard anything pending in the receive buffer.
    fn clear_input(&mut self) -> Result<(), BoxError>;
}

/// Opens serial devices by name.
pub trait SerialOpener {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialPort + Send>, BoxError>;
}

/// Lists serial devices currently present on the host.
pub trait PortEnumerator {
    fn ports(&self) -> Result<Vec<String>, BoxError>;
}

/// Decision model boundary.
///
/// Implementations may keep temporal state but must be deterministic for
/// identical input sequences.
pub trait Agent {
    /// Prime temporal state; called once when actuation starts.
    fn reset(&mut self, frames: &FrameSet) -> Result<(), BoxError>;

    fn decide(
        &mut self,
        frames: &FrameSet,
        prior_action: (f32, f32),
        maneuver: Maneuver,
    ) -> Result<RawAction, BoxError>;

    /// Auxiliary diagnostic images; not needed for control.
    fn render(&self) -> Vec<Frame> {
        Vec::new()
    }
}
