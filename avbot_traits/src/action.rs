//! Decision outputs and operator directives.

/// Action produced by a decision source, before calibration.
///
/// Nominal ranges are steer in [-1, 1] and throttle in [0, 1]; a decision
/// model may emit values in its own native bounds, which calibration rescales.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawAction {
    pub steer: f32,
    pub throttle: f32,
    pub brake: bool,
}

impl RawAction {
    pub const ZERO: RawAction = RawAction {
        steer: 0.0,
        throttle: 0.0,
        brake: false,
    };

    pub fn new(steer: f32, throttle: f32, brake: bool) -> Self {
        Self {
            steer,
            throttle,
            brake,
        }
    }

    /// (steer, throttle) pair fed back to the decision source next cycle.
    pub fn pair(&self) -> (f32, f32) {
        (self.steer, self.throttle)
    }
}

/// High-level operator directive read at the start of every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Maneuver {
    #[default]
    Forward,
    Left,
    Right,
}

impl Maneuver {
    /// Wire value given to decision models (0 forward, 1 left, 2 right).
    pub fn code(self) -> u8 {
        match self {
            Maneuver::Forward => 0,
            Maneuver::Left => 1,
            Maneuver::Right => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownManeuver(pub u8);

impl std::fmt::Display for UnknownManeuver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown maneuver code {} (expected 0, 1 or 2)", self.0)
    }
}

impl std::error::Error for UnknownManeuver {}

impl TryFrom<u8> for Maneuver {
    type Error = UnknownManeuver;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Maneuver::Forward),
            1 => Ok(Maneuver::Left),
            2 => Ok(Maneuver::Right),
            other => Err(UnknownManeuver(other)),
        }
    }
}
