mod backend;
mod cli;
mod drive;
mod error_fmt;
mod manual;
mod ops;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, json_mode};
use crate::drive::DriveArgs;
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            if json_mode() {
                println!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

/// Missing file means defaults; anything else must parse and validate.
fn load_config(path: &Path) -> eyre::Result<(avbot_config::Config, bool)> {
    if !path.exists() {
        return Ok((avbot_config::Config::default(), false));
    }
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = avbot_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok((cfg, true))
}

fn init_tracing(level: &str, json: bool, logging: &avbot_config::Logging) -> eyre::Result<()> {
    let console_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Console goes to stderr so stdout stays machine-readable.
    let pretty = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter())
    });
    let json_console = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
    });

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file {file:?} has no file name"))?;
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("create log directory {}", dir.display()))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_level = logging.level.as_deref().unwrap_or("info");
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(file_level)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(pretty)
        .with(json_console)
        .with(file_layer)
        .try_init();
    Ok(())
}

fn run(cli: Cli) -> eyre::Result<()> {
    let (cfg, found) = load_config(&cli.config)?;
    init_tracing(&cli.log_level, cli.json, &cfg.logging)?;
    if !found {
        tracing::info!(config = %cli.config.display(), "config file not found; using defaults");
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match &cli.cmd {
        Commands::Drive {
            agent,
            probe,
            command,
            port,
            maneuver,
            maneuver_stdin,
            cycles,
            stats,
        } => {
            let args = DriveArgs {
                agent: agent.clone(),
                probe: *probe,
                command: command.clone(),
                port: port.clone(),
                maneuver: *maneuver,
                maneuver_stdin: *maneuver_stdin,
                cycles: *cycles,
                stats: *stats,
            };
            drive::run_drive(&cfg, &args, &running, cli.json)
        }
        Commands::Manual { port, record } => manual::run_manual(
            &cfg,
            port.as_deref(),
            record.as_deref(),
            &running,
            cli.json,
        )
        .map(|_| ()),
        Commands::Ports => ops::run_ports(cli.json),
        Commands::Calibration { file, action } => {
            ops::run_calibration(&cfg, file.as_deref(), action, cli.json)
        }
        Commands::CheckAgent { dir } => ops::run_check_agent(dir, cli.json),
        Commands::SelfCheck => ops::run_self_check(&cfg, cli.json),
    }
}
