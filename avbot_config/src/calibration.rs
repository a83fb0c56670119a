//! Manual-controller calibration, persisted as a flat JSON record:
//!
//! ```json
//! { "middle_steer": 128, "steer_limit": 128, "throttle_limit": 255, "delay_time": 0.4 }
//! ```
//!
//! Missing keys take their defaults, and a missing file yields the default
//! record.
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::SettingsPct;
use crate::atomic::write_atomic;

/// Byte value of a centered steering command on the wire.
pub const STEER_MIDPOINT: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationRecord {
    pub middle_steer: u8,
    pub steer_limit: u8,
    pub throttle_limit: u8,
    /// Seconds between manual commands
    pub delay_time: f32,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            middle_steer: STEER_MIDPOINT,
            steer_limit: STEER_MIDPOINT,
            throttle_limit: u8::MAX,
            delay_time: 0.4,
        }
    }
}

impl CalibrationRecord {
    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.delay_time.is_finite() && self.delay_time >= 0.0 && self.delay_time <= 10.0) {
            eyre::bail!("calibration.delay_time must be in [0.0, 10.0] seconds");
        }
        Ok(())
    }

    /// Express the byte-domain record as main-loop operator percentages.
    pub fn to_settings_pct(&self) -> SettingsPct {
        let mid = f32::from(STEER_MIDPOINT);
        SettingsPct {
            throttle_limit: f32::from(self.throttle_limit) / 255.0 * 100.0,
            max_steer: (f32::from(self.steer_limit) / mid * 100.0).min(100.0),
            steer_center: (f32::from(self.middle_steer) - mid) / mid * 100.0,
            delay: self.delay_time * 100.0,
        }
    }
}

pub fn load_calibration(path: &Path) -> eyre::Result<CalibrationRecord> {
    if !path.exists() {
        return Ok(CalibrationRecord::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read calibration {:?}: {}", path, e))?;
    let rec: CalibrationRecord = serde_json::from_str(&text)
        .map_err(|e| eyre::eyre!("parse calibration {:?}: {}", path, e))?;
    rec.validate()?;
    Ok(rec)
}

pub fn save_calibration(path: &Path, rec: &CalibrationRecord) -> eyre::Result<()> {
    rec.validate()?;
    let mut bytes = serde_json::to_vec_pretty(rec)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).map_err(|e| eyre::eyre!("write calibration {:?}: {}", path, e))?;
    Ok(())
}
