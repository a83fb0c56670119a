#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the vehicle control loop.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - `AgentDescriptor` is the JSON sidecar shipped next to a decision model.
//! - `CalibrationRecord` is the manual controller's persisted byte-domain
//!   calibration, stored as flat JSON.
use serde::Deserialize;
use std::path::PathBuf;

pub mod atomic;
pub mod calibration;
pub mod descriptor;

pub use atomic::write_atomic;
pub use calibration::{CalibrationRecord, load_calibration, save_calibration};
pub use descriptor::{ActionBounds, AgentDescriptor, PolicySpec, load_agent_descriptor};

/// Default line rate of the actuator controller.
pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SerialCfg {
    /// Device name or path; absent means run without actuation (test mode)
    pub port: Option<String>,
    pub baud: u32,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CamerasCfg {
    /// One entry per camera slot: `sim:pattern`, `sim:blank`, `sim:dark`,
    /// `sim:fail`, or a path to a raw rgb24 stream.
    pub sources: Vec<String>,
    pub read_timeout_ms: u64,
}

impl Default for CamerasCfg {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            read_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AgentCfg {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    /// Overrides the agent descriptor's cycle period when set (seconds)
    pub delta_frame_s: Option<f32>,
    pub engage_settle_ms: u64,
    pub brake_hold_ms: u64,
    pub telemetry_capacity: usize,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            delta_frame_s: None,
            engage_settle_ms: 400,
            brake_hold_ms: 2000,
            telemetry_capacity: 64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SafetyCfg {
    /// Gray level at or below which a pixel counts as dark
    pub blank_threshold: u8,
    /// Dark-pixel share above which a frame counts as covered
    pub blank_fraction: f32,
    /// Consecutive blank frames tolerated while engaged
    pub max_consecutive_blank: u32,
    pub link_poll_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            blank_threshold: 45,
            blank_fraction: 0.5,
            max_consecutive_blank: 1,
            link_poll_ms: 1000,
        }
    }
}

/// Operator settings in percent, as accepted by the calibration box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsPct {
    pub throttle_limit: f32,
    pub max_steer: f32,
    pub steer_center: f32,
    pub delay: f32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Unset means the loaded agent's native throttle bound (100% without one)
    pub throttle_limit_pct: Option<f32>,
    /// Unset means the loaded agent's native steer bound (100% without one)
    pub max_steer_pct: Option<f32>,
    pub steer_center_pct: f32,
    /// Minimum cycle time imposed by the operator, in hundredths of a second
    pub delay_pct: f32,
    /// Persisted manual-controller record
    pub file: PathBuf,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            throttle_limit_pct: None,
            max_steer_pct: None,
            steer_center_pct: 0.0,
            delay_pct: 0.0,
            file: PathBuf::from("calibration.json"),
        }
    }
}

impl CalibrationCfg {
    /// Operator settings in percent. `native` is the agent's
    /// `(max_steer, max_throttle)`; unset limits start there so the default
    /// scale factor is one.
    pub fn settings_pct(&self, native: Option<(f32, f32)>) -> SettingsPct {
        let (native_steer, native_throttle) = native.unwrap_or((1.0, 1.0));
        SettingsPct {
            throttle_limit: self
                .throttle_limit_pct
                .unwrap_or(native_throttle * 100.0),
            max_steer: self.max_steer_pct.unwrap_or(native_steer * 100.0),
            steer_center: self.steer_center_pct,
            delay: self.delay_pct,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialCfg,
    pub cameras: CamerasCfg,
    pub agent: AgentCfg,
    pub control: ControlCfg,
    pub safety: SafetyCfg,
    pub calibration: CalibrationCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn pct_in(v: f32, lo: f32, hi: f32) -> bool {
    v.is_finite() && v >= lo && v <= hi
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.baud == 0 {
            eyre::bail!("serial.baud must be > 0");
        }
        if let Some(port) = &self.serial.port
            && port.trim().is_empty()
        {
            eyre::bail!("serial.port must not be empty when set");
        }

        // Cameras
        if self.cameras.read_timeout_ms == 0 {
            eyre::bail!("cameras.read_timeout_ms must be >= 1");
        }
        if let Some(i) = self.cameras.sources.iter().position(|s| s.trim().is_empty()) {
            eyre::bail!("cameras.sources[{i}] must not be empty");
        }

        // Control
        if let Some(dt) = self.control.delta_frame_s
            && !(dt.is_finite() && dt > 0.0 && dt <= 10.0)
        {
            eyre::bail!("control.delta_frame_s must be in (0.0, 10.0]");
        }
        if self.control.brake_hold_ms > 60 * 1000 {
            eyre::bail!("control.brake_hold_ms is unreasonably large (>60s)");
        }
        if self.control.engage_settle_ms > 60 * 1000 {
            eyre::bail!("control.engage_settle_ms is unreasonably large (>60s)");
        }
        if self.control.telemetry_capacity == 0 {
            eyre::bail!("control.telemetry_capacity must be >= 1");
        }

        // Safety
        if !(self.safety.blank_fraction > 0.0 && self.safety.blank_fraction <= 1.0) {
            eyre::bail!("safety.blank_fraction must be in (0.0, 1.0]");
        }
        if self.safety.max_consecutive_blank == 0 {
            eyre::bail!("safety.max_consecutive_blank must be >= 1");
        }
        if self.safety.link_poll_ms == 0 {
            eyre::bail!("safety.link_poll_ms must be >= 1");
        }

        // Calibration
        let c = &self.calibration;
        if let Some(v) = c.throttle_limit_pct
            && !pct_in(v, 0.0, 100.0)
        {
            eyre::bail!("calibration.throttle_limit_pct must be in [0, 100]");
        }
        if let Some(v) = c.max_steer_pct
            && !pct_in(v, 0.0, 100.0)
        {
            eyre::bail!("calibration.max_steer_pct must be in [0, 100]");
        }
        if !pct_in(c.steer_center_pct, -100.0, 100.0) {
            eyre::bail!("calibration.steer_center_pct must be in [-100, 100]");
        }
        if !pct_in(c.delay_pct, 0.0, 100.0) {
            eyre::bail!("calibration.delay_pct must be in [0, 100]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
