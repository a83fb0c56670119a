//! Sidecar descriptor shipped in an agent directory.
//!
//! Expected layout:
//!
//! ```text
//! my_agent/
//!   agent.json   descriptor (this schema)
//!   model.csv    model artifact named by `model`
//! ```
//!
//! Example `agent.json`:
//!
//! ```json
//! {
//!   "model": "model.csv",
//!   "cameras": 1,
//!   "frame_width": 160,
//!   "frame_height": 120,
//!   "delta_frame": 0.1,
//!   "action_bounds": { "max_steer": 1.0, "throttle_range": [0.0, 0.6] },
//!   "policy": { "kind": "scripted", "repeat": true }
//! }
//! ```
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "agent.json";

/// The decision model's native output range.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ActionBounds {
    pub max_steer: f32,
    pub throttle_range: [f32; 2],
}

impl ActionBounds {
    /// Upper throttle bound, used as the default throttle limit.
    pub fn max_throttle(&self) -> f32 {
        self.throttle_range[1]
    }
}

fn default_constant_throttle() -> f32 {
    0.3
}

fn default_turn_steer() -> f32 {
    0.6
}

/// Which built-in agent the directory is meant for.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicySpec {
    /// Fixed throttle; steer follows the operator's maneuver.
    Constant {
        #[serde(default = "default_constant_throttle")]
        throttle: f32,
        #[serde(default = "default_turn_steer")]
        turn_steer: f32,
    },
    /// Replays the model artifact's `steer,throttle,brake` rows.
    Scripted {
        #[serde(default)]
        repeat: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDescriptor {
    /// Model artifact, relative to the agent directory
    pub model: PathBuf,
    pub cameras: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Target cycle period in seconds
    pub delta_frame: f32,
    pub action_bounds: ActionBounds,
    pub policy: PolicySpec,
    #[serde(skip)]
    root: PathBuf,
}

impl AgentDescriptor {
    pub fn dir(&self) -> &Path {
        &self.root
    }

    pub fn model_path(&self) -> PathBuf {
        self.root.join(&self.model)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.cameras == 0 {
            eyre::bail!("descriptor.cameras must be >= 1");
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            eyre::bail!("descriptor.frame_width and frame_height must be > 0");
        }
        if !(self.delta_frame.is_finite() && self.delta_frame > 0.0) {
            eyre::bail!("descriptor.delta_frame must be > 0");
        }
        let b = &self.action_bounds;
        if !(b.max_steer.is_finite() && b.max_steer > 0.0) {
            eyre::bail!("descriptor.action_bounds.max_steer must be > 0");
        }
        let [lo, hi] = b.throttle_range;
        if !(lo.is_finite() && hi.is_finite() && hi > 0.0 && lo <= hi) {
            eyre::bail!("descriptor.action_bounds.throttle_range must be [lo, hi] with 0 < hi and lo <= hi");
        }
        if let PolicySpec::Constant {
            throttle,
            turn_steer,
        } = self.policy
            && !(throttle.is_finite() && turn_steer.is_finite())
        {
            eyre::bail!("descriptor.policy values must be finite");
        }
        Ok(())
    }
}

/// Load and validate `agent.json` from `dir`, checking that the model
/// artifact it names exists.
pub fn load_agent_descriptor(dir: &Path) -> eyre::Result<AgentDescriptor> {
    let path = dir.join(DESCRIPTOR_FILE);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| eyre::eyre!("read agent descriptor {:?}: {}", path, e))?;
    let mut desc: AgentDescriptor = serde_json::from_str(&text)
        .map_err(|e| eyre::eyre!("parse agent descriptor {:?}: {}", path, e))?;
    desc.root = dir.to_path_buf();
    desc.validate()?;
    let model = desc.model_path();
    if !model.is_file() {
        eyre::bail!("model artifact {:?} named by descriptor not found", model);
    }
    Ok(desc)
}
