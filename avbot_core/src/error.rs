use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AvError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for camera")]
    Timeout,
    #[error("serial link lost")]
    LinkLost,
    #[error("value out of range: {0}")]
    Domain(String),
    #[error("decision model error: {0}")]
    Agent(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing camera rig")]
    MissingRig,
    #[error("missing actuator channel")]
    MissingChannel,
    #[error("agent expects {expected} cameras, rig has {actual}")]
    CameraCount { expected: usize, actual: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Why an engage request was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActivationError {
    #[error("actuation is already active")]
    AlreadyEngaged,
    #[error("no control mode selected")]
    Idle,
    #[error("no decision model loaded")]
    NoAgent,
    #[error("camera slot {0} has no device assigned")]
    CameraUnassigned(usize),
    #[error("primary camera is blank or covered")]
    CameraBlank,
    #[error("decision model reset failed: {0}")]
    AgentReset(String),
    #[error("control loop is not running")]
    LoopStopped,
}

/// Why actuation stopped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DisengageCause {
    #[error("camera blanked or covered")]
    CameraBlanked,
    #[error("serial control link disappeared")]
    LinkLost,
    #[error("operator request")]
    Operator,
    #[error("control loop shutting down")]
    Shutdown,
}

impl DisengageCause {
    /// Safety-driven causes, as opposed to operator or shutdown requests.
    pub fn is_emergency(self) -> bool {
        matches!(self, Self::CameraBlanked | Self::LinkLost)
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
