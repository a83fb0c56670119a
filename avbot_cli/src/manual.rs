//! `avbot manual`: literal commands from stdin, byte-domain calibration.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use avbot_config::{Config, load_calibration};
use avbot_core::manual::ManualSummary;
use avbot_core::{ManualCommand, ManualDriver, SerialActuatorChannel};
use avbot_traits::MonotonicClock;
use crossbeam_channel as xch;
use serde_json::json;

use crate::backend;

enum Line {
    Command(ManualCommand),
    Quit,
    Skip,
}

fn parse_line(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Line::Skip;
    }
    if matches!(line, "quit" | "exit" | "q") {
        return Line::Quit;
    }
    match line.parse::<ManualCommand>() {
        Ok(cmd) => Line::Command(cmd),
        Err(e) => {
            eprintln!("{e}; expected one of: {}", command_names());
            Line::Skip
        }
    }
}

fn command_names() -> String {
    ManualCommand::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Feed stdin lines to `tx` until EOF or `quit`; dropping `tx` ends the session.
fn spawn_stdin_reader(tx: xch::Sender<ManualCommand>) {
    let spawned = std::thread::Builder::new()
        .name("manual-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_line(&line) {
                    Line::Command(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Line::Quit => break,
                    Line::Skip => {}
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn stdin reader");
    }
}

pub fn run_manual(
    cfg: &Config,
    port: Option<&str>,
    record_path: Option<&Path>,
    running: &AtomicBool,
    json_out: bool,
) -> eyre::Result<ManualSummary> {
    let path = record_path.unwrap_or(cfg.calibration.file.as_path());
    let record = load_calibration(path)?;

    let serial = backend::serial_backend();
    let mut channel = SerialActuatorChannel::new(serial.opener, cfg.serial.baud);
    match port.or(cfg.serial.port.as_deref()) {
        Some(p) if channel.set_port(p) => {}
        Some(p) => tracing::warn!(port = p, "actuator port did not open; commands are not sent"),
        None => tracing::warn!("no actuator port configured; commands are not sent"),
    }

    if !json_out {
        eprintln!("manual control: {}", command_names());
    }
    let (tx, rx) = xch::unbounded();
    spawn_stdin_reader(tx);
    let summary = ManualDriver::new(&mut channel, record, Arc::new(MonotonicClock::new()))
        .run(&rx, running);

    if json_out {
        println!(
            "{}",
            json!({
                "event": "manual_summary",
                "sent": summary.sent,
                "offline": summary.offline,
                "link_failed": summary.link_failed,
            })
        );
    } else {
        println!(
            "manual session ended: {} sent, {} not delivered{}",
            summary.sent,
            summary.offline,
            if summary.link_failed { " (link failed)" } else { "" }
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_parse_to_commands() {
        assert!(matches!(parse_line(" right "), Line::Command(ManualCommand::Right)));
        assert!(matches!(parse_line("quit"), Line::Quit));
        assert!(matches!(parse_line("# comment"), Line::Skip));
        assert!(matches!(parse_line("sideways"), Line::Skip));
    }
}
