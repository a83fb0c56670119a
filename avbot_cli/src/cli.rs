//! CLI argument definitions and shared statics.

use avbot_traits::Maneuver;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

/// `forward`, `left`, `right` or their codes 0, 1, 2.
pub fn parse_maneuver(s: &str) -> Result<Maneuver, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "forward" | "f" => Ok(Maneuver::Forward),
        "left" | "l" => Ok(Maneuver::Left),
        "right" | "r" => Ok(Maneuver::Right),
        other => other
            .parse::<u8>()
            .ok()
            .and_then(|code| Maneuver::try_from(code).ok())
            .ok_or_else(|| format!("unknown maneuver '{s}' (forward, left, right)")),
    }
}

#[derive(Parser, Debug)]
#[command(name = "avbot", version, about = "Camera-driven vehicle control loop")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/avbot.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Engage actuation and run the control loop until Ctrl-C
    Drive {
        /// Directory holding the agent descriptor and model (overrides [agent].dir)
        #[arg(long, value_name = "DIR")]
        agent: Option<PathBuf>,
        /// Drive a fixed calibration probe profile instead of the agent
        #[arg(long, value_name = "ID", conflicts_with = "command")]
        probe: Option<u8>,
        /// Drive a literal manual command instead of the agent
        #[arg(long, value_name = "NAME")]
        command: Option<String>,
        /// Actuator serial device (overrides [serial].port)
        #[arg(long, value_name = "DEV")]
        port: Option<String>,
        /// Initial operator maneuver given to the agent
        #[arg(long, value_name = "MANEUVER", value_parser = parse_maneuver)]
        maneuver: Option<Maneuver>,
        /// Read maneuvers (forward, left, right) from stdin while driving
        #[arg(long = "maneuver-stdin", action = ArgAction::SetTrue)]
        maneuver_stdin: bool,
        /// Stop after this many cycles
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,
        /// Print cycle latency stats on exit
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Drive by literal commands read from stdin, one per line
    Manual {
        /// Actuator serial device (overrides [serial].port)
        #[arg(long, value_name = "DEV")]
        port: Option<String>,
        /// Calibration record to use (overrides [calibration].file)
        #[arg(long, value_name = "FILE")]
        record: Option<PathBuf>,
    },
    /// List serial devices visible to the host
    Ports,
    /// Inspect or edit the persisted manual calibration record
    Calibration {
        /// Record file (overrides [calibration].file)
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
        #[command(subcommand)]
        action: CalibrationAction,
    },
    /// Load an agent directory and report whether it can run
    CheckAgent {
        /// Directory holding agent.json and the model artifact
        dir: PathBuf,
    },
    /// Quick health check (config, ports, cameras, agent)
    SelfCheck,
}

#[derive(Subcommand, Debug)]
pub enum CalibrationAction {
    /// Print the record and the loop settings it implies
    Show,
    /// Change one field and save
    Set {
        /// middle_steer | steer_limit | throttle_limit | delay_time
        key: String,
        value: String,
    },
    /// Write the default record
    Reset,
}
