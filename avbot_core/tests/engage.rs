//! Engage preconditions and the test-mode fallback.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use avbot_core::{
    ActivationError, CameraRig, FrameTimingLoop, LoopEvent, LoopMode, ManualCommand,
    SerialActuatorChannel,
};
use avbot_hardware::{SimPattern, SimulatedBus, SimulatedCamera};
use avbot_traits::clock::manual::ManualClock;
use avbot_traits::{Agent, FrameSet, Maneuver, RawAction};
use rstest::rstest;

const PORT: &str = "/dev/ttyACM0";

struct ResetFails;

impl Agent for ResetFails {
    fn reset(&mut self, _frames: &FrameSet) -> Result<(), Box<dyn Error + Send + Sync>> {
        Err("weights not initialised".into())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior: (f32, f32),
        _m: Maneuver,
    ) -> Result<RawAction, Box<dyn Error + Send + Sync>> {
        Ok(RawAction::ZERO)
    }
}

fn camera(pattern: SimPattern) -> Box<SimulatedCamera> {
    Box::new(SimulatedCamera::new(8, 6, pattern))
}

fn build(rig: CameraRig, bus: &SimulatedBus) -> FrameTimingLoop {
    FrameTimingLoop::builder()
        .rig(rig)
        .channel(SerialActuatorChannel::new(Arc::new(bus.clone()), 115_200))
        .clock(Arc::new(ManualClock::new()))
        .telemetry_capacity(256)
        .build()
        .unwrap()
}

fn one_camera(pattern: SimPattern) -> CameraRig {
    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", camera(pattern)).unwrap();
    rig
}

#[rstest]
fn idle_mode_cannot_engage() {
    let mut lp = build(one_camera(SimPattern::Gradient), &SimulatedBus::new());
    assert_eq!(lp.engage(), Err(ActivationError::Idle));
    assert!(!lp.is_engaged());
}

#[rstest]
fn agent_mode_needs_an_agent() {
    let mut lp = build(one_camera(SimPattern::Gradient), &SimulatedBus::new());
    assert_eq!(
        lp.set_mode(LoopMode::AgentControlled),
        Err(ActivationError::NoAgent)
    );
    assert_eq!(lp.mode(), LoopMode::Idle);
}

#[rstest]
fn every_camera_slot_must_be_assigned() {
    let mut rig = CameraRig::new(2, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", camera(SimPattern::Gradient)).unwrap();
    let mut lp = build(rig, &SimulatedBus::new());
    lp.set_mode(LoopMode::CalibrationProbe(1)).unwrap();
    assert_eq!(lp.engage(), Err(ActivationError::CameraUnassigned(1)));
}

#[rstest]
#[case::uniform(SimPattern::Uniform([90, 90, 90]))]
#[case::covered(SimPattern::Dark)]
#[case::failing(SimPattern::Fail)]
fn blank_primary_camera_refuses_engage(#[case] pattern: SimPattern) {
    let mut lp = build(one_camera(pattern), &SimulatedBus::new());
    lp.set_mode(LoopMode::ManualOverride(ManualCommand::Forward))
        .unwrap();
    assert_eq!(lp.engage(), Err(ActivationError::CameraBlank));
}

#[rstest]
fn agent_reset_failure_refuses_engage() {
    let mut lp = FrameTimingLoop::builder()
        .rig(one_camera(SimPattern::Gradient))
        .channel(SerialActuatorChannel::new(Arc::new(SimulatedBus::new()), 115_200))
        .custom_agent(Box::new(ResetFails), 1.0, 1.0)
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    lp.set_mode(LoopMode::AgentControlled).unwrap();
    match lp.engage() {
        Err(ActivationError::AgentReset(msg)) => assert!(msg.contains("weights")),
        other => panic!("expected AgentReset, got {other:?}"),
    }
    assert!(!lp.is_engaged());
}

#[rstest]
fn no_link_engages_in_test_mode() {
    let mut lp = build(one_camera(SimPattern::Gradient), &SimulatedBus::new());
    let events = lp.events();
    lp.set_mode(LoopMode::CalibrationProbe(2)).unwrap();
    lp.engage().unwrap();
    assert!(lp.is_engaged());
    assert!(!lp.safety().link_armed());
    let engaged: Vec<bool> = events
        .try_iter()
        .filter_map(|e| match e {
            LoopEvent::Engaged { test_mode } => Some(test_mode),
            _ => None,
        })
        .collect();
    assert_eq!(engaged, vec![true]);
}

#[rstest]
fn engage_reopens_a_configured_port() {
    let bus = SimulatedBus::new();
    let mut lp = build(one_camera(SimPattern::Gradient), &bus);
    // Remembered although it could not open yet.
    assert!(!lp.set_port(Some(PORT)));
    bus.plug(PORT);
    lp.set_mode(LoopMode::ManualOverride(ManualCommand::Ready))
        .unwrap();
    lp.engage().unwrap();
    assert!(lp.channel().is_connected());
    assert_eq!(bus.written_to(PORT).len(), 1, "neutral on engage");
}

#[rstest]
fn second_engage_is_refused() {
    let mut lp = build(one_camera(SimPattern::Gradient), &SimulatedBus::new());
    lp.set_mode(LoopMode::CalibrationProbe(1)).unwrap();
    lp.engage().unwrap();
    assert_eq!(lp.engage(), Err(ActivationError::AlreadyEngaged));
}

#[rstest]
fn selecting_idle_disengages() {
    let mut lp = build(one_camera(SimPattern::Gradient), &SimulatedBus::new());
    lp.set_mode(LoopMode::CalibrationProbe(1)).unwrap();
    lp.engage().unwrap();
    lp.set_mode(LoopMode::Idle).unwrap();
    assert!(!lp.is_engaged());
}
