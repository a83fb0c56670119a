//! Hardware assembly from config: serial backend and camera rig.

use std::sync::Arc;
use std::time::Duration;

use avbot_config::Config;
use avbot_core::CameraRig;
use avbot_hardware::camera_from_spec;
use avbot_traits::{PortEnumerator, SerialOpener};
use eyre::WrapErr;

/// Frame size used when no agent descriptor dictates one.
pub const DEFAULT_RESOLUTION: (u32, u32) = (160, 120);

pub struct SerialBackend {
    pub opener: Arc<dyn SerialOpener + Send + Sync>,
    pub ports: Arc<dyn PortEnumerator + Send + Sync>,
}

#[cfg(feature = "hardware")]
pub fn serial_backend() -> SerialBackend {
    let sys = Arc::new(avbot_hardware::SystemPorts);
    SerialBackend {
        opener: sys.clone(),
        ports: sys,
    }
}

/// Simulated bus. `AVBOT_SIM_PORTS` (comma separated) lists the devices
/// that appear plugged in.
#[cfg(not(feature = "hardware"))]
pub fn serial_backend() -> SerialBackend {
    let ports = std::env::var("AVBOT_SIM_PORTS").unwrap_or_default();
    let bus = avbot_hardware::SimulatedBus::with_ports(
        ports.split(',').map(str::trim).filter(|p| !p.is_empty()),
    );
    let bus = Arc::new(bus);
    SerialBackend {
        opener: bus.clone(),
        ports: bus,
    }
}

/// Camera sources from config, padded with simulated cameras up to `slots`.
pub fn camera_sources(cfg: &Config, slots: usize) -> Vec<String> {
    let mut sources = cfg.cameras.sources.clone();
    if sources.len() < slots {
        tracing::warn!(
            configured = sources.len(),
            slots,
            "fewer camera sources than slots; filling with simulated cameras"
        );
        sources.resize(slots, "sim:pattern".to_string());
    }
    sources
}

pub fn build_rig(cfg: &Config, slots: usize, (width, height): (u32, u32)) -> eyre::Result<CameraRig> {
    let timeout = Duration::from_millis(cfg.cameras.read_timeout_ms);
    let mut rig = CameraRig::new(slots, width, height, timeout);
    for (pos, spec) in camera_sources(cfg, slots).iter().take(slots).enumerate() {
        let cam = camera_from_spec(spec, width, height)
            .wrap_err_with(|| format!("open camera {pos} from {spec:?}"))?;
        rig.assign(pos, spec.clone(), cam)?;
    }
    Ok(rig)
}
