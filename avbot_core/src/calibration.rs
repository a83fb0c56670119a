//! Operator calibration applied to every decision before actuation.
//!
//! Operator limits are scaled against the decision model's native bounds so
//! the operator can impose a ceiling independent of the model's output scale:
//!
//! ```text
//! steer'    = clamp(steer_center + steer * max_steer / default_max_steer, -1, 1)
//! throttle' = clamp(throttle * throttle_limit / default_throttle_limit, 0, 1)
//! ```
//!
//! Settings arrive as percentages and are clamped to their valid range when
//! stored, so every snapshot the loop reads is already in range.
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use avbot_config::SettingsPct;
use avbot_traits::Clock;

use crate::error::{AvError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    pub throttle_limit: f32,
    pub max_steer: f32,
    pub steer_center: f32,
    /// Minimum effective cycle time in seconds
    pub delay: f32,
    pub default_max_steer: f32,
    pub default_throttle_limit: f32,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            throttle_limit: 1.0,
            max_steer: 1.0,
            steer_center: 0.0,
            delay: 0.0,
            default_max_steer: 1.0,
            default_throttle_limit: 1.0,
        }
    }
}

/// One operator-tunable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSetting {
    ThrottleLimit,
    MaxSteer,
    SteerCenter,
    Delay,
}

impl CalibrationSetting {
    pub const ALL: [CalibrationSetting; 4] = [
        Self::ThrottleLimit,
        Self::MaxSteer,
        Self::SteerCenter,
        Self::Delay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ThrottleLimit => "throttle_limit",
            Self::MaxSteer => "max_steer",
            Self::SteerCenter => "steer_center",
            Self::Delay => "delay",
        }
    }

    fn bounds(self) -> (f32, f32) {
        match self {
            Self::SteerCenter => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }
}

impl FromStr for CalibrationSetting {
    type Err = AvError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "throttle_limit" | "throttle" => Ok(Self::ThrottleLimit),
            "max_steer" | "steer" => Ok(Self::MaxSteer),
            "steer_center" | "center" => Ok(Self::SteerCenter),
            "delay" => Ok(Self::Delay),
            other => Err(AvError::Config(format!(
                "unknown calibration setting '{other}'"
            ))),
        }
    }
}

#[inline]
fn nan_to_zero(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v }
}

/// Pure calibration transform; output is always in [-1, 1] x [0, 1].
pub fn calibrate_pair(s: &CalibrationSettings, steer: f32, throttle: f32) -> (f32, f32) {
    let steer_ratio = s.max_steer / s.default_max_steer;
    let throttle_ratio = s.throttle_limit / s.default_throttle_limit;
    let steer = nan_to_zero(s.steer_center + nan_to_zero(steer) * steer_ratio);
    let throttle = nan_to_zero(nan_to_zero(throttle) * throttle_ratio);
    (steer.clamp(-1.0, 1.0), throttle.clamp(0.0, 1.0))
}

/// Thread-safe calibration state shared by the loop and operator threads.
pub struct CalibrationBox {
    settings: RwLock<CalibrationSettings>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for CalibrationBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationBox")
            .field("settings", &self.snapshot())
            .finish()
    }
}

impl CalibrationBox {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            settings: RwLock::new(CalibrationSettings::default()),
            clock,
        }
    }

    /// All settings as one consistent view.
    pub fn snapshot(&self) -> CalibrationSettings {
        match self.settings.read() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut CalibrationSettings)) {
        match self.settings.write() {
            Ok(mut s) => f(&mut s),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Store `value_pct / 100` for `setting`, clamped to the setting's range.
    ///
    /// Returns the stored fraction.
    pub fn apply_setting(&self, setting: CalibrationSetting, value_pct: f32) -> Result<f32> {
        if !value_pct.is_finite() {
            return Err(AvError::Config(format!(
                "{} must be a finite percentage, got {value_pct}",
                setting.name()
            ))
            .into());
        }
        let (lo, hi) = setting.bounds();
        let fraction = value_pct / 100.0;
        let stored = fraction.clamp(lo, hi);
        if stored != fraction {
            tracing::warn!(
                setting = setting.name(),
                requested_pct = value_pct,
                stored,
                "calibration setting clamped"
            );
        }
        self.update(|s| match setting {
            CalibrationSetting::ThrottleLimit => s.throttle_limit = stored,
            CalibrationSetting::MaxSteer => s.max_steer = stored,
            CalibrationSetting::SteerCenter => s.steer_center = stored,
            CalibrationSetting::Delay => s.delay = stored,
        });
        tracing::debug!(setting = setting.name(), stored, "calibration updated");
        Ok(stored)
    }

    /// Apply a full set of percentages, e.g. from config or a persisted record.
    pub fn apply_settings_pct(&self, pct: &SettingsPct) -> Result<()> {
        self.apply_setting(CalibrationSetting::ThrottleLimit, pct.throttle_limit)?;
        self.apply_setting(CalibrationSetting::MaxSteer, pct.max_steer)?;
        self.apply_setting(CalibrationSetting::SteerCenter, pct.steer_center)?;
        self.apply_setting(CalibrationSetting::Delay, pct.delay)?;
        Ok(())
    }

    /// Record the decision model's native bounds. Both must be finite and > 0.
    pub fn apply_default_limits(
        &self,
        default_max_steer: f32,
        default_throttle_limit: f32,
    ) -> Result<()> {
        for (name, v) in [
            ("default_max_steer", default_max_steer),
            ("default_throttle_limit", default_throttle_limit),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AvError::Config(format!("{name} must be > 0, got {v}")).into());
            }
        }
        self.update(|s| {
            s.default_max_steer = default_max_steer;
            s.default_throttle_limit = default_throttle_limit;
        });
        tracing::info!(
            default_max_steer,
            default_throttle_limit,
            "decision model limits applied"
        );
        Ok(())
    }

    /// Calibrate one decision. Blocks for `delay - proc_time` when the
    /// operator delay exceeds the cycle's processing time.
    pub fn calibrate(&self, steer: f32, throttle: f32, proc_time: Duration) -> (f32, f32) {
        let s = self.snapshot();
        let out = calibrate_pair(&s, steer, throttle);
        let delay = Duration::try_from_secs_f32(s.delay).unwrap_or_default();
        if delay > proc_time {
            self.clock.sleep(delay - proc_time);
        }
        out
    }

    /// Calibrated neutral command (centered steer, zero throttle), no delay.
    pub fn neutral(&self) -> (f32, f32) {
        calibrate_pair(&self.snapshot(), 0.0, 0.0)
    }
}
