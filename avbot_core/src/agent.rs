//! Built-in decision agents, selected by the descriptor's `policy.kind`.
//!
//! External models plug in by implementing [`avbot_traits::Agent`] and
//! handing the boxed agent to the loop builder directly.
use std::path::Path;

use avbot_config::{AgentDescriptor, PolicySpec, load_agent_descriptor};
use avbot_traits::{Agent, BoxError, FrameSet, Maneuver, RawAction};
use serde::Deserialize;

use crate::error::{AvError, Result};

/// Fixed throttle; steering follows the operator's maneuver.
#[derive(Debug, Clone)]
pub struct ConstantAgent {
    throttle: f32,
    turn_steer: f32,
}

impl ConstantAgent {
    pub fn new(throttle: f32, turn_steer: f32) -> Self {
        Self {
            throttle,
            turn_steer,
        }
    }
}

impl Agent for ConstantAgent {
    fn reset(&mut self, _frames: &FrameSet) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior_action: (f32, f32),
        maneuver: Maneuver,
    ) -> std::result::Result<RawAction, BoxError> {
        let steer = match maneuver {
            Maneuver::Forward => 0.0,
            Maneuver::Left => -self.turn_steer,
            Maneuver::Right => self.turn_steer,
        };
        Ok(RawAction::new(steer, self.throttle, false))
    }
}

/// Model artifact row for the scripted agent.
///
/// Expected headers:
/// steer,throttle,brake
///
/// Example:
/// steer,throttle,brake
/// 0.0,0.30,false
/// -0.4,0.25,false
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScriptRow {
    pub steer: f32,
    pub throttle: f32,
    pub brake: bool,
}

pub fn load_script_csv(path: &Path) -> eyre::Result<Vec<RawAction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open model script {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["steer", "throttle", "brake"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "model script must have headers 'steer,throttle,brake', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScriptRow>().enumerate() {
        match rec {
            Ok(r) if r.steer.is_finite() && r.throttle.is_finite() => {
                rows.push(RawAction::new(r.steer, r.throttle, r.brake));
            }
            Ok(_) => eyre::bail!("model script row {} has non-finite values", idx + 2),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    if rows.is_empty() {
        eyre::bail!("model script {:?} has no rows", path);
    }
    Ok(rows)
}

/// Replays recorded actions in order; deterministic for any input.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    rows: Vec<RawAction>,
    cursor: usize,
    repeat: bool,
}

impl ScriptedAgent {
    pub fn new(rows: Vec<RawAction>, repeat: bool) -> Self {
        Self {
            rows,
            cursor: 0,
            repeat,
        }
    }
}

impl Agent for ScriptedAgent {
    fn reset(&mut self, _frames: &FrameSet) -> std::result::Result<(), BoxError> {
        self.cursor = 0;
        Ok(())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior_action: (f32, f32),
        _maneuver: Maneuver,
    ) -> std::result::Result<RawAction, BoxError> {
        if self.cursor >= self.rows.len() {
            if !self.repeat || self.rows.is_empty() {
                return Ok(RawAction::ZERO);
            }
            self.cursor = 0;
        }
        let action = self.rows[self.cursor];
        self.cursor += 1;
        Ok(action)
    }
}

/// A ready-to-run agent with the descriptor it was built from.
pub struct LoadedAgent {
    pub descriptor: AgentDescriptor,
    pub agent: Box<dyn Agent + Send>,
}

impl std::fmt::Debug for LoadedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedAgent")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Build the built-in agent a descriptor asks for.
pub fn build_agent(desc: &AgentDescriptor) -> Result<Box<dyn Agent + Send>> {
    match desc.policy {
        PolicySpec::Constant {
            throttle,
            turn_steer,
        } => Ok(Box::new(ConstantAgent::new(throttle, turn_steer))),
        PolicySpec::Scripted { repeat } => {
            let rows = load_script_csv(&desc.model_path())
                .map_err(|e| AvError::Config(format!("{e:#}")))?;
            tracing::debug!(rows = rows.len(), repeat, "scripted agent loaded");
            Ok(Box::new(ScriptedAgent::new(rows, repeat)))
        }
    }
}

/// Load descriptor and model artifact from `dir`.
pub fn load_agent(dir: &Path) -> Result<LoadedAgent> {
    let descriptor = load_agent_descriptor(dir)?;
    let agent = build_agent(&descriptor)?;
    tracing::info!(
        dir = %dir.display(),
        policy = ?descriptor.policy,
        cameras = descriptor.cameras,
        "agent loaded"
    );
    Ok(LoadedAgent { descriptor, agent })
}
