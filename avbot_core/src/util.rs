//! Common time helpers for avbot_core.
use std::time::Duration;

/// Cycle period used when neither config nor agent descriptor sets one.
pub const DEFAULT_DELTA_FRAME: Duration = Duration::from_millis(400);

/// Seconds to `Duration`, or `None` for non-finite, negative or zero input.
#[inline]
pub fn positive_secs(s: f32) -> Option<Duration> {
    if s.is_finite() && s > 0.0 {
        Duration::try_from_secs_f32(s).ok()
    } else {
        None
    }
}

/// Duration as fractional milliseconds, for telemetry output.
#[inline]
pub fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
