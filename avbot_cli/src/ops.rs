//! One-shot commands: ports, calibration record, agent check, self-check.

use std::path::Path;
use std::time::Duration;

use avbot_config::{CalibrationRecord, Config, load_calibration, save_calibration};
use avbot_core::load_agent;
use avbot_hardware::camera_from_spec;
use avbot_traits::{Camera, PortEnumerator};
use eyre::WrapErr;
use serde_json::json;

use crate::backend::{self, DEFAULT_RESOLUTION};
use crate::cli::CalibrationAction;

pub fn run_ports(json_out: bool) -> eyre::Result<()> {
    let serial = backend::serial_backend();
    let ports = serial
        .ports
        .ports()
        .map_err(|e| eyre::eyre!("enumerate serial ports: {e}"))?;
    if json_out {
        println!("{}", json!({ "ports": ports }));
    } else if ports.is_empty() {
        println!("no serial devices found");
    } else {
        for p in &ports {
            println!("{p}");
        }
    }
    Ok(())
}

fn set_field(rec: &mut CalibrationRecord, key: &str, value: &str) -> eyre::Result<()> {
    let byte = || {
        value
            .parse::<u8>()
            .wrap_err_with(|| format!("{key} must be an integer in [0, 255], got {value:?}"))
    };
    match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "middle_steer" => rec.middle_steer = byte()?,
        "steer_limit" => rec.steer_limit = byte()?,
        "throttle_limit" => rec.throttle_limit = byte()?,
        "delay_time" => {
            rec.delay_time = value
                .parse::<f32>()
                .wrap_err_with(|| format!("delay_time must be a number, got {value:?}"))?;
        }
        other => eyre::bail!(
            "unknown calibration field '{other}' (middle_steer, steer_limit, throttle_limit, delay_time)"
        ),
    }
    rec.validate()
}

fn print_record(rec: &CalibrationRecord, path: &Path, json_out: bool) {
    let pct = rec.to_settings_pct();
    if json_out {
        println!(
            "{}",
            json!({
                "file": path.display().to_string(),
                "record": rec,
                "settings_pct": {
                    "throttle_limit": pct.throttle_limit,
                    "max_steer": pct.max_steer,
                    "steer_center": pct.steer_center,
                    "delay": pct.delay,
                },
            })
        );
    } else {
        println!("calibration record {}", path.display());
        println!("  middle_steer   {}", rec.middle_steer);
        println!("  steer_limit    {}", rec.steer_limit);
        println!("  throttle_limit {}", rec.throttle_limit);
        println!("  delay_time     {:.2}s", rec.delay_time);
        println!(
            "loop settings: throttle {:.0}%  steer {:.0}%  center {:+.0}%  delay {:.0}%",
            pct.throttle_limit, pct.max_steer, pct.steer_center, pct.delay
        );
    }
}

pub fn run_calibration(
    cfg: &Config,
    file: Option<&Path>,
    action: &CalibrationAction,
    json_out: bool,
) -> eyre::Result<()> {
    let path = file.unwrap_or(cfg.calibration.file.as_path());
    let rec = match action {
        CalibrationAction::Show => load_calibration(path)?,
        CalibrationAction::Set { key, value } => {
            let mut rec = load_calibration(path)?;
            set_field(&mut rec, key, value)?;
            save_calibration(path, &rec)?;
            tracing::info!(file = %path.display(), key, value, "calibration saved");
            rec
        }
        CalibrationAction::Reset => {
            let rec = CalibrationRecord::default();
            save_calibration(path, &rec)?;
            tracing::info!(file = %path.display(), "calibration reset to defaults");
            rec
        }
    };
    print_record(&rec, path, json_out);
    Ok(())
}

pub fn run_check_agent(dir: &Path, json_out: bool) -> eyre::Result<()> {
    let loaded = load_agent(dir)?;
    let d = &loaded.descriptor;
    if json_out {
        println!(
            "{}",
            json!({
                "ok": true,
                "model": d.model_path().display().to_string(),
                "cameras": d.cameras,
                "frame_width": d.frame_width,
                "frame_height": d.frame_height,
                "delta_frame": d.delta_frame,
                "max_steer": d.action_bounds.max_steer,
                "max_throttle": d.action_bounds.max_throttle(),
                "policy": format!("{:?}", d.policy),
            })
        );
    } else {
        println!("agent ok: {}", dir.display());
        println!("  model      {}", d.model_path().display());
        println!(
            "  cameras    {} x {}x{}",
            d.cameras, d.frame_width, d.frame_height
        );
        println!("  period     {:.3}s", d.delta_frame);
        println!(
            "  bounds     steer {:.2}, throttle {:.2}",
            d.action_bounds.max_steer,
            d.action_bounds.max_throttle()
        );
        println!("  policy     {:?}", d.policy);
    }
    Ok(())
}

/// Config already validated by the caller; this checks what it points at.
pub fn run_self_check(cfg: &Config, json_out: bool) -> eyre::Result<()> {
    let serial = backend::serial_backend();
    let ports = serial
        .ports
        .ports()
        .map_err(|e| eyre::eyre!("enumerate serial ports: {e}"))?;
    let port_present = cfg
        .serial
        .port
        .as_ref()
        .map(|p| ports.iter().any(|q| q == p));
    if port_present == Some(false) {
        tracing::warn!(port = ?cfg.serial.port, "configured actuator port not present");
    }

    let (slots, (w, h)) = match &cfg.agent.dir {
        Some(dir) => {
            let loaded = load_agent(dir)?;
            let d = loaded.descriptor;
            (d.cameras, (d.frame_width, d.frame_height))
        }
        None => (cfg.cameras.sources.len().max(1), DEFAULT_RESOLUTION),
    };
    let timeout = Duration::from_millis(cfg.cameras.read_timeout_ms);
    for (pos, spec) in backend::camera_sources(cfg, slots).iter().enumerate() {
        let mut cam = camera_from_spec(spec, w, h)
            .wrap_err_with(|| format!("open camera {pos} from {spec:?}"))?;
        cam.read(timeout)
            .map_err(|e| eyre::eyre!("camera {pos} ({spec}) did not produce a frame: {e}"))?;
    }

    if json_out {
        println!(
            "{}",
            json!({ "ok": true, "ports": ports, "port_present": port_present, "cameras": slots })
        );
    } else {
        println!("OK");
    }
    Ok(())
}
