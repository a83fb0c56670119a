//! Maps `Box<dyn Error>` from trait boundaries to typed `AvError`.
//!
//! The traits in `avbot_traits` return `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `avbot_hardware::HwError` downcasting.

use crate::error::AvError;

/// Map a trait-boundary error to a typed `AvError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> AvError {
    #[cfg(feature = "hardware-errors")]
    {
        use avbot_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => AvError::Timeout,
                HwError::Disconnected | HwError::PortNotFound(_) => AvError::LinkLost,
                other => AvError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        AvError::Timeout
    } else if lower.contains("disconnected") || lower.contains("no such device") {
        AvError::LinkLost
    } else {
        AvError::Hardware(s)
    }
}
