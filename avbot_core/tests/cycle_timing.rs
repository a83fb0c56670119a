//! Cycle period enforcement, measured on a virtual clock.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use avbot_core::{
    CalibrationBox, CalibrationSetting, CameraRig, FrameTimingLoop, LoopMode, ManualCommand,
    SerialActuatorChannel,
};
use avbot_hardware::{SimPattern, SimulatedBus, SimulatedCamera};
use avbot_traits::clock::manual::ManualClock;
use avbot_traits::{Agent, FrameSet, Maneuver, RawAction};
use rstest::rstest;

/// Agent whose decision "takes" `work` of virtual time.
struct SlowAgent {
    clock: ManualClock,
    work: Duration,
}

impl Agent for SlowAgent {
    fn reset(&mut self, _frames: &FrameSet) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior: (f32, f32),
        _m: Maneuver,
    ) -> Result<RawAction, Box<dyn Error + Send + Sync>> {
        self.clock.advance(self.work);
        Ok(RawAction::new(0.2, 0.4, false))
    }
}

fn build(clock: &ManualClock, work: Duration, delta: Duration) -> FrameTimingLoop {
    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", Box::new(SimulatedCamera::new(8, 6, SimPattern::Gradient)))
        .unwrap();
    let mut lp = FrameTimingLoop::builder()
        .rig(rig)
        .channel(SerialActuatorChannel::new(Arc::new(SimulatedBus::new()), 115_200))
        .custom_agent(
            Box::new(SlowAgent {
                clock: clock.clone(),
                work,
            }),
            1.0,
            1.0,
        )
        .delta_frame(delta)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    lp.set_mode(LoopMode::AgentControlled).unwrap();
    lp
}

#[rstest]
#[case(400, 100, 400, false)]
#[case(400, 500, 500, true)]
#[case(100, 100, 100, false)]
fn cycle_lasts_at_least_delta_frame(
    #[case] delta_ms: u64,
    #[case] work_ms: u64,
    #[case] expected_ms: u64,
    #[case] overrun: bool,
) {
    let clock = ManualClock::new();
    let mut lp = build(
        &clock,
        Duration::from_millis(work_ms),
        Duration::from_millis(delta_ms),
    );
    let t = lp.step();
    assert_eq!(t.proc_time, Duration::from_millis(work_ms));
    assert_eq!(t.cycle_time, Duration::from_millis(expected_ms));
    assert_eq!(t.overrun, overrun);
}

#[test]
fn overruns_do_not_skip_cycles() {
    let clock = ManualClock::new();
    let mut lp = build(&clock, Duration::from_millis(500), Duration::from_millis(400));
    for i in 1..=3 {
        let t = lp.step();
        assert_eq!(t.cycle, i);
    }
    assert_eq!(clock.sleeps(), 0);
}

#[test]
fn operator_delay_stretches_the_cycle() {
    let clock = ManualClock::new();
    let cal = Arc::new(CalibrationBox::new(Arc::new(clock.clone())));
    cal.apply_setting(CalibrationSetting::Delay, 70.0).unwrap();

    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", Box::new(SimulatedCamera::new(8, 6, SimPattern::Gradient)))
        .unwrap();
    let mut lp = FrameTimingLoop::builder()
        .rig(rig)
        .channel(SerialActuatorChannel::new(Arc::new(SimulatedBus::new()), 115_200))
        .custom_agent(
            Box::new(SlowAgent {
                clock: clock.clone(),
                work: Duration::from_millis(100),
            }),
            1.0,
            1.0,
        )
        .delta_frame(Duration::from_millis(400))
        .calibration(cal)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    lp.set_mode(LoopMode::AgentControlled).unwrap();

    let t = lp.step();
    // 400 ms period, then 300 ms more to reach the 700 ms operator delay.
    let ms = t.cycle_time.as_secs_f64() * 1000.0;
    assert!((ms - 700.0).abs() < 1.0, "cycle took {ms} ms");
}

#[test]
fn idle_cycles_publish_zeroed_telemetry() {
    let clock = ManualClock::new();
    let mut lp = build(&clock, Duration::from_millis(50), Duration::from_millis(100));
    lp.set_mode(LoopMode::Idle).unwrap();
    let t = lp.step();
    assert_eq!((t.steer, t.throttle, t.brake), (0.0, 0.0, false));
    assert_eq!(t.mode, "idle");
    assert_eq!(t.cycle_time, Duration::from_millis(100));
}

#[test]
fn calibrated_values_are_published_when_not_engaged() {
    let clock = ManualClock::new();
    let mut lp = build(&clock, Duration::ZERO, Duration::from_millis(100));
    let t = lp.step();
    assert!(!t.engaged);
    assert!((t.steer - 0.2).abs() < 1e-6);
    assert!((t.throttle - 0.4).abs() < 1e-6);
}

/// Fails its first decision, then steers right.
struct FlakyAgent {
    calls: u32,
}

impl Agent for FlakyAgent {
    fn reset(&mut self, _frames: &FrameSet) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior: (f32, f32),
        _m: Maneuver,
    ) -> Result<RawAction, Box<dyn Error + Send + Sync>> {
        self.calls += 1;
        if self.calls == 1 {
            return Err("inference backend not ready".into());
        }
        Ok(RawAction::new(0.5, 0.3, false))
    }
}

#[test]
fn decision_failure_degrades_to_zero_action_then_recovers() {
    let clock = ManualClock::new();
    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", Box::new(SimulatedCamera::new(8, 6, SimPattern::Gradient)))
        .unwrap();
    let mut lp = FrameTimingLoop::builder()
        .rig(rig)
        .channel(SerialActuatorChannel::new(Arc::new(SimulatedBus::new()), 115_200))
        .custom_agent(Box::new(FlakyAgent { calls: 0 }), 1.0, 1.0)
        .delta_frame(Duration::from_millis(100))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    lp.set_mode(LoopMode::AgentControlled).unwrap();

    let first = lp.step();
    assert_eq!((first.steer, first.throttle), (0.0, 0.0));
    assert_eq!(first.cycle_time, Duration::from_millis(100));

    let second = lp.step();
    assert!((second.steer - 0.5).abs() < 1e-6);
    assert!((second.throttle - 0.3).abs() < 1e-6);
}

/// Asks for the brake on every cycle.
struct BrakingAgent;

impl Agent for BrakingAgent {
    fn reset(&mut self, _frames: &FrameSet) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    fn decide(
        &mut self,
        _frames: &FrameSet,
        _prior: (f32, f32),
        _m: Maneuver,
    ) -> Result<RawAction, Box<dyn Error + Send + Sync>> {
        Ok(RawAction::new(0.0, 0.4, true))
    }
}

#[test]
fn only_manual_packets_carry_the_brake_bit() {
    const PORT: &str = "/dev/ttyACM0";
    let clock = ManualClock::new();
    let bus = SimulatedBus::with_ports([PORT]);
    let mut channel = SerialActuatorChannel::new(Arc::new(bus.clone()), 115_200);
    assert!(channel.set_port(PORT));
    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(0, "sim0", Box::new(SimulatedCamera::new(8, 6, SimPattern::Gradient)))
        .unwrap();
    let mut lp = FrameTimingLoop::builder()
        .rig(rig)
        .channel(channel)
        .custom_agent(Box::new(BrakingAgent), 1.0, 1.0)
        .delta_frame(Duration::from_millis(100))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    lp.set_mode(LoopMode::AgentControlled).unwrap();
    lp.engage().unwrap();

    let t = lp.step();
    assert!(!t.brake);
    let last = bus.written_to(PORT).pop().unwrap();
    assert_eq!(last, vec![36, 128, 102, 0, 0, 64], "agent drives calibrated pair only");

    lp.set_mode(LoopMode::ManualOverride(ManualCommand::Brake))
        .unwrap();
    let t = lp.step();
    assert!(t.brake);
    let last = bus.written_to(PORT).pop().unwrap();
    assert_eq!(last, vec![36, 127, 0, 255, 0, 64]);
}
