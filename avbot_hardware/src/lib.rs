pub mod camera;
pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;

pub use camera::PipeCamera;
pub use sim::{SimPattern, SimulatedBus, SimulatedCamera};

#[cfg(feature = "hardware")]
pub use serial::{HardwareSerial, SystemPorts};

/// Build a camera from a config source spec.
///
/// `sim:pattern`, `sim:blank`, `sim:dark` and `sim:fail` select simulated
/// cameras; anything else is treated as a path to a raw rgb24 frame stream.
pub fn camera_from_spec(
    spec: &str,
    width: u32,
    height: u32,
) -> error::Result<Box<dyn avbot_traits::Camera + Send>> {
    if let Some(kind) = spec.strip_prefix("sim:") {
        let pattern = match kind {
            "pattern" => SimPattern::Gradient,
            "blank" => SimPattern::Uniform([90, 90, 90]),
            "dark" => SimPattern::Dark,
            "fail" => SimPattern::Fail,
            other => {
                return Err(error::HwError::UnknownCamera(format!("sim:{other}")));
            }
        };
        return Ok(Box::new(SimulatedCamera::new(width, height, pattern)));
    }
    let cam = PipeCamera::open(spec, width, height)?;
    Ok(Box::new(cam))
}
