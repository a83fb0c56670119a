//! Human-readable error descriptions and structured JSON error formatting.

use avbot_core::error::{ActivationError, AvError, BuildError, DisengageCause};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(cause) = err.downcast_ref::<DisengageCause>() {
        return match cause {
            DisengageCause::CameraBlanked => {
                "What happened: Actuation stopped because the primary camera went blank.\nLikely causes: Lens covered, camera unplugged, or a frame source that stopped producing images.\nHow to fix: Clear the lens and check the camera cable, then engage again.".to_string()
            }
            DisengageCause::LinkLost => {
                "What happened: The actuator serial device disappeared while driving.\nLikely causes: USB cable unplugged, controller lost power, or the device was renumbered.\nHow to fix: Reconnect the controller, confirm it with `avbot ports`, then engage again.".to_string()
            }
            DisengageCause::Operator | DisengageCause::Shutdown => format!(
                "What happened: Actuation stopped ({cause}).\nLikely causes: Operator request.\nHow to fix: Nothing to fix; engage again when ready."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<ActivationError>() {
        return match ae {
            ActivationError::Idle => {
                "What happened: Engage was refused because no control mode is selected.\nLikely causes: No agent, probe or manual command was chosen.\nHow to fix: Pass --agent DIR, --probe ID or --command NAME.".to_string()
            }
            ActivationError::NoAgent => {
                "What happened: Agent control was requested but no agent is loaded.\nLikely causes: [agent].dir is not set and --agent was not given.\nHow to fix: Point --agent at a directory holding agent.json (check it with `avbot check-agent DIR`).".to_string()
            }
            ActivationError::CameraUnassigned(pos) => format!(
                "What happened: Camera slot {pos} has no device.\nLikely causes: Fewer [cameras].sources than the agent expects.\nHow to fix: Add a source for every camera the agent descriptor lists."
            ),
            ActivationError::CameraBlank => {
                "What happened: Engage was refused because the primary camera looks blank or covered.\nLikely causes: Lens cap on, dark scene, or a failing frame source.\nHow to fix: Uncover the lens or fix [cameras].sources[0], then retry.".to_string()
            }
            ActivationError::AgentReset(msg) => format!(
                "What happened: The agent failed to reset ({msg}).\nLikely causes: Bad model artifact or incompatible frames.\nHow to fix: Run `avbot check-agent DIR` and fix what it reports."
            ),
            ActivationError::AlreadyEngaged | ActivationError::LoopStopped => format!(
                "What happened: {ae}.\nLikely causes: Conflicting operator requests.\nHow to fix: Disengage first, then retry."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::CameraCount { expected, actual } => format!(
                "What happened: The agent expects {expected} cameras but {actual} are configured.\nLikely causes: [cameras].sources does not match the agent descriptor.\nHow to fix: List exactly {expected} entries in [cameras].sources."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            BuildError::MissingRig | BuildError::MissingChannel => format!(
                "What happened: {be}.\nLikely causes: Internal wiring error.\nHow to fix: Re-run with --log-level=debug and report the output."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AvError>() {
        if matches!(ae, AvError::Timeout) {
            return "What happened: Camera read timed out.\nLikely causes: Frame source stalled or read timeout too low.\nHow to fix: Check the grabber feeding the camera and consider raising cameras.read_timeout_ms.".to_string();
        }
        return format!(
            "What happened: {ae}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("agent descriptor") || lower.contains("model artifact") {
        return format!(
            "What happened: The agent directory could not be loaded.\nLikely causes: Missing agent.json, a malformed descriptor, or a missing model file.\nHow to fix: Check the directory contents. Original: {msg}"
        );
    }

    if lower.contains("parse calibration")
        || lower.contains("read calibration")
        || lower.contains("calibration.delay_time")
    {
        return format!(
            "What happened: The calibration record could not be used ({msg}).\nLikely causes: Hand-edited JSON with bad values.\nHow to fix: Run `avbot calibration reset` or fix the file."
        );
    }

    if lower.contains("must be") || lower.contains("parse config") || lower.contains("read config") {
        return format!(
            "What happened: Configuration is invalid or incomplete ({msg}).\nLikely causes: Out-of-range values or a TOML syntax error.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: emergency stops and refused engages get their own.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(cause) = err.downcast_ref::<DisengageCause>() {
        return match cause {
            DisengageCause::CameraBlanked => 3,
            DisengageCause::LinkLost => 4,
            DisengageCause::Operator | DisengageCause::Shutdown => 0,
        };
    }
    if err.downcast_ref::<ActivationError>().is_some() {
        return 5;
    }
    1
}

/// Machine-readable name of the typed error, if any.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(cause) = err.downcast_ref::<DisengageCause>() {
        return match cause {
            DisengageCause::CameraBlanked => "CameraBlanked",
            DisengageCause::LinkLost => "LinkLost",
            DisengageCause::Operator => "Operator",
            DisengageCause::Shutdown => "Shutdown",
        };
    }
    if let Some(ae) = err.downcast_ref::<ActivationError>() {
        return match ae {
            ActivationError::AlreadyEngaged => "AlreadyEngaged",
            ActivationError::Idle => "Idle",
            ActivationError::NoAgent => "NoAgent",
            ActivationError::CameraUnassigned(_) => "CameraUnassigned",
            ActivationError::CameraBlank => "CameraBlank",
            ActivationError::AgentReset(_) => "AgentReset",
            ActivationError::LoopStopped => "LoopStopped",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({ "reason": reason_name(err), "message": humanize(err) });
    if let Some(ActivationError::CameraUnassigned(pos)) = err.downcast_ref::<ActivationError>() {
        obj["details"] = json!({ "slot": pos });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_loss_has_its_own_code_and_hint() {
        let err = eyre::Report::new(DisengageCause::LinkLost);
        assert_eq!(exit_code_for_error(&err), 4);
        assert!(humanize(&err).contains("avbot ports"));
    }

    #[test]
    fn refused_engage_reports_slot_in_json() {
        let err = eyre::Report::new(ActivationError::CameraUnassigned(1));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "CameraUnassigned");
        assert_eq!(v["details"]["slot"], 1);
        assert_eq!(exit_code_for_error(&err), 5);
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }
}
