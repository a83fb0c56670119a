#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Real-time vehicle control loop (hardware-agnostic).
//!
//! All hardware goes through the `avbot_traits` seams (`Camera`,
//! `SerialOpener`, `PortEnumerator`, `Agent`, `Clock`).
//!
//! ## Architecture
//!
//! - **Calibration**: operator limits over model-native bounds (`calibration`)
//! - **Actuation**: 6-byte packet codec and serial channel (`actuator`)
//! - **Safety**: blank/cover detection and control-link watchdog (`safety`)
//! - **Loop**: fixed-period cycle with engage/disengage sequences (`control_loop`)
//! - **Supervision**: loop thread plus operator command channel (`supervisor`)
//! - **Manual**: literal command table and byte-domain manual driving (`manual`)
//!
//! ## Per-cycle flow
//!
//! ```text
//! frames -> decide(frames, prior, maneuver) -> calibrate -> send
//!        \-> blank check (frame 0)        link watchdog (own thread) -/
//! ```

pub mod actuator;
pub mod agent;
pub mod calibration;
pub mod control_loop;
pub mod error;
pub mod hw_error;
pub mod manual;
pub mod rig;
pub mod safety;
pub mod stats;
pub mod supervisor;
pub mod util;

pub use actuator::{ActuatorCommand, Delivery, SerialActuatorChannel};
pub use agent::{LoadedAgent, build_agent, load_agent};
pub use calibration::{CalibrationBox, CalibrationSetting, CalibrationSettings, calibrate_pair};
pub use control_loop::{
    FrameTimingLoop, FrameTimingLoopBuilder, LoopCommand, LoopEvent, LoopMode, ManeuverHandle,
    Telemetry, probe_action,
};
pub use error::{ActivationError, AvError, BuildError, DisengageCause, Result};
pub use manual::{ManualCommand, ManualDriver};
pub use rig::CameraRig;
pub use safety::{BlankDetector, LinkWatchdog, SafetyMonitor, SafetyState, is_blank_or_covered};
pub use stats::CycleStats;
pub use supervisor::Supervisor;
