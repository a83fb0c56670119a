//! `avbot drive`: assemble the loop, engage, and follow its events.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use avbot_config::Config;
use avbot_core::util::{as_ms, positive_secs};
use avbot_core::{
    BlankDetector, CalibrationBox, CycleStats, FrameTimingLoop, LoopEvent,
    LoopMode, ManualCommand, SafetyMonitor, SerialActuatorChannel, Supervisor, Telemetry,
    load_agent,
};
use avbot_traits::{Clock, Maneuver, MonotonicClock};
use crossbeam_channel as xch;
use serde_json::json;

use crate::backend::{self, DEFAULT_RESOLUTION};
use crate::cli::parse_maneuver;

pub struct DriveArgs {
    pub agent: Option<PathBuf>,
    pub probe: Option<u8>,
    pub command: Option<String>,
    pub port: Option<String>,
    pub maneuver: Option<Maneuver>,
    pub maneuver_stdin: bool,
    pub cycles: Option<u64>,
    pub stats: bool,
}

fn select_mode(args: &DriveArgs, have_agent: bool) -> eyre::Result<LoopMode> {
    if let Some(id) = args.probe {
        return Ok(LoopMode::CalibrationProbe(id));
    }
    if let Some(name) = &args.command {
        return Ok(LoopMode::ManualOverride(name.parse::<ManualCommand>()?));
    }
    if have_agent {
        return Ok(LoopMode::AgentControlled);
    }
    eyre::bail!("nothing to drive: pass --agent DIR, --probe ID or --command NAME")
}

fn build_loop(cfg: &Config, args: &DriveArgs) -> eyre::Result<(FrameTimingLoop, LoopMode)> {
    let agent_dir = args.agent.clone().or_else(|| cfg.agent.dir.clone());
    // Probe and manual runs do not need the agent, so only load it for agent control.
    let loaded = match (&agent_dir, args.probe.is_none() && args.command.is_none()) {
        (Some(dir), true) => Some(load_agent(dir)?),
        _ => None,
    };
    let mode = select_mode(args, loaded.is_some())?;

    let (slots, resolution) = loaded.as_ref().map_or_else(
        || (cfg.cameras.sources.len().max(1), DEFAULT_RESOLUTION),
        |l| {
            let d = &l.descriptor;
            (d.cameras, (d.frame_width, d.frame_height))
        },
    );
    let rig = backend::build_rig(cfg, slots, resolution)?;

    let serial = backend::serial_backend();
    let mut channel = SerialActuatorChannel::new(serial.opener.clone(), cfg.serial.baud);
    if let Some(port) = args.port.as_deref().or(cfg.serial.port.as_deref())
        && !channel.set_port(port)
    {
        tracing::warn!(port, "actuator port did not open; engage will retry");
    }

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let calibration = Arc::new(CalibrationBox::new(clock.clone()));
    let native = loaded.as_ref().map(|l| {
        let b = &l.descriptor.action_bounds;
        (b.max_steer, b.max_throttle())
    });
    calibration.apply_settings_pct(&cfg.calibration.settings_pct(native))?;

    let detector = BlankDetector {
        threshold: cfg.safety.blank_threshold,
        fraction: cfg.safety.blank_fraction,
    };
    let safety = SafetyMonitor::new(detector, cfg.safety.max_consecutive_blank).with_link_watch(
        serial.ports.clone(),
        Duration::from_millis(cfg.safety.link_poll_ms),
    );

    let mut builder = FrameTimingLoop::builder()
        .rig(rig)
        .channel(channel)
        .calibration(calibration)
        .clock(clock)
        .safety(safety)
        .engage_settle(Duration::from_millis(cfg.control.engage_settle_ms))
        .brake_hold(Duration::from_millis(cfg.control.brake_hold_ms))
        .telemetry_capacity(cfg.control.telemetry_capacity);
    if let Some(loaded) = loaded {
        builder = builder.agent(loaded);
    }
    if let Some(d) = cfg.control.delta_frame_s.and_then(positive_secs) {
        builder = builder.delta_frame(d);
    }
    Ok((builder.build()?, mode))
}

/// Forward maneuver lines from stdin until EOF.
fn spawn_maneuver_reader(tx: xch::Sender<Maneuver>) {
    let spawned = std::thread::Builder::new()
        .name("drive-maneuver".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_maneuver(&line) {
                    Ok(m) => {
                        if tx.send(m).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn maneuver reader");
    }
}

fn print_telemetry(t: &Telemetry, json_out: bool) {
    if json_out {
        println!(
            "{}",
            json!({
                "event": "telemetry",
                "cycle": t.cycle,
                "mode": t.mode,
                "steer": t.steer,
                "throttle": t.throttle,
                "brake": t.brake,
                "engaged": t.engaged,
                "proc_ms": as_ms(t.proc_time),
                "cycle_ms": as_ms(t.cycle_time),
                "overrun": t.overrun,
            })
        );
    } else {
        println!(
            "cycle {:>6} [{}] steer={:+.3} throttle={:.3} brake={} {:.1}ms{}",
            t.cycle,
            t.mode,
            t.steer,
            t.throttle,
            if t.brake { "on" } else { "off" },
            as_ms(t.cycle_time),
            if t.overrun { " OVERRUN" } else { "" },
        );
    }
}

fn print_event(ev: &LoopEvent, json_out: bool) {
    match ev {
        LoopEvent::Telemetry(t) => print_telemetry(t, json_out),
        LoopEvent::Engaged { test_mode } => {
            if json_out {
                println!("{}", json!({ "event": "engaged", "test_mode": test_mode }));
            } else if *test_mode {
                println!("engaged (test mode: no actuator link)");
            } else {
                println!("engaged");
            }
        }
        LoopEvent::Disengaged(cause) => {
            if json_out {
                println!("{}", json!({ "event": "disengaged", "cause": cause.to_string() }));
            } else {
                println!("disengaged: {cause}");
            }
        }
        LoopEvent::LinkFailed { port } => {
            if json_out {
                println!("{}", json!({ "event": "link_failed", "port": port }));
            } else {
                println!("actuator write failed on {}", port.as_deref().unwrap_or("?"));
            }
        }
        LoopEvent::ModeChanged(mode) => {
            if json_out {
                println!("{}", json!({ "event": "mode", "mode": mode.label() }));
            }
        }
        LoopEvent::Render(images) => {
            tracing::debug!(images = images.len(), "diagnostic images received");
        }
        LoopEvent::Stopped => {
            if json_out {
                println!("{}", json!({ "event": "stopped" }));
            } else {
                println!("stopped");
            }
        }
    }
}

fn print_stats(stats: &CycleStats, delta_frame: Duration) {
    let ms = |d: Option<Duration>| d.map_or(0.0, as_ms);
    eprintln!("\n--- Cycle Stats ---");
    eprintln!("Cycles: {}", stats.cycles);
    eprintln!("Period (ms): {:.1}", as_ms(delta_frame));
    eprintln!(
        "Cycle min/avg/max (ms): {:.1} / {:.1} / {:.1}",
        ms(stats.min),
        ms(stats.mean()),
        ms(stats.max)
    );
    eprintln!("Overruns (> period): {}", stats.overruns);
    eprintln!("-------------------\n");
}

/// Run until `running` clears (Ctrl-C), the cycle limit, or an emergency disengage.
///
/// An emergency disengage is returned as an error carrying its
/// `DisengageCause`, so the exit code tells operators what happened.
pub fn run_drive(
    cfg: &Config,
    args: &DriveArgs,
    running: &AtomicBool,
    json_out: bool,
) -> eyre::Result<()> {
    let (lp, mode) = build_loop(cfg, args)?;
    let delta_frame = lp.delta_frame();
    let sup = Supervisor::spawn(lp);
    if let Some(m) = args.maneuver {
        sup.set_maneuver(m);
    }
    let (maneuver_tx, maneuvers) = xch::unbounded();
    if args.maneuver_stdin {
        spawn_maneuver_reader(maneuver_tx);
    }
    sup.set_mode(mode)?;
    sup.engage()?;
    tracing::info!(mode = mode.label(), ?delta_frame, "drive started");

    let events = sup.events().clone();
    let mut stats = CycleStats::default();
    let mut emergency = None;
    while running.load(Ordering::Relaxed) {
        for m in maneuvers.try_iter() {
            tracing::info!(maneuver = ?m, "maneuver changed");
            sup.set_maneuver(m);
        }
        let Ok(ev) = events.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        print_event(&ev, json_out);
        match ev {
            LoopEvent::Telemetry(t) => {
                stats.record(&t);
                if args.cycles.is_some_and(|n| t.cycle >= n) {
                    break;
                }
            }
            LoopEvent::Disengaged(cause) if cause.is_emergency() => {
                emergency = Some(cause);
                break;
            }
            _ => {}
        }
    }

    let _ = sup.stop();
    for ev in events.try_iter() {
        print_event(&ev, json_out);
    }
    if args.stats {
        print_stats(&stats, delta_frame);
    }
    match emergency {
        Some(cause) => Err(eyre::Report::new(cause)),
        None => {
            tracing::info!(cycles = stats.cycles, "drive finished");
            Ok(())
        }
    }
}
