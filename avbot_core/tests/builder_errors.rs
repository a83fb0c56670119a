use std::fs;
use std::sync::Arc;
use std::time::Duration;

use avbot_core::error::BuildError;
use avbot_core::{CameraRig, FrameTimingLoop, SerialActuatorChannel, load_agent};
use avbot_hardware::SimulatedBus;
use rstest::rstest;
use tempfile::tempdir;

fn channel() -> SerialActuatorChannel {
    SerialActuatorChannel::new(Arc::new(SimulatedBus::new()), 115_200)
}

fn rig(slots: usize, w: u32, h: u32) -> CameraRig {
    CameraRig::new(slots, w, h, Duration::from_millis(5))
}

fn build_error(err: &eyre::Report) -> Option<&BuildError> {
    err.downcast_ref::<BuildError>()
}

#[rstest]
fn missing_rig_yields_typed_build_error() {
    let err = FrameTimingLoop::builder()
        .channel(channel())
        .try_build()
        .expect_err("should fail with MissingRig");
    match build_error(&err) {
        Some(BuildError::MissingRig) => {}
        other => panic!("expected MissingRig, got: {other:?}"),
    }
}

#[rstest]
fn missing_channel_yields_typed_build_error() {
    let err = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .try_build()
        .expect_err("should fail with MissingChannel");
    assert_eq!(build_error(&err), Some(&BuildError::MissingChannel));
}

#[rstest]
#[case::empty_rig(rig(0, 4, 3), Duration::from_millis(100), "no slots")]
#[case::zero_period(rig(1, 4, 3), Duration::ZERO, "delta_frame")]
fn invalid_parts_are_rejected(
    #[case] rig: CameraRig,
    #[case] delta: Duration,
    #[case] needle: &str,
) {
    let err = FrameTimingLoop::builder()
        .rig(rig)
        .channel(channel())
        .delta_frame(delta)
        .build()
        .expect_err("should be rejected");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[rstest]
fn zero_telemetry_capacity_is_rejected() {
    let err = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .telemetry_capacity(0)
        .build()
        .expect_err("should be rejected");
    assert!(matches!(build_error(&err), Some(BuildError::InvalidConfig(_))));
}

fn agent_dir(cameras: usize, w: u32, h: u32, delta: f32) -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("model.csv"), "steer,throttle,brake\n0.0,0.2,false\n").unwrap();
    fs::write(
        dir.path().join("agent.json"),
        format!(
            r#"{{"model":"model.csv","cameras":{cameras},"frame_width":{w},"frame_height":{h},
                "delta_frame":{delta},"action_bounds":{{"max_steer":0.5,"throttle_range":[0.0,0.4]}},
                "policy":{{"kind":"scripted"}}}}"#
        ),
    )
    .unwrap();
    dir
}

#[rstest]
fn camera_count_must_match_descriptor() {
    let dir = agent_dir(2, 4, 3, 0.1);
    let err = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .agent(load_agent(dir.path()).unwrap())
        .build()
        .expect_err("should fail with CameraCount");
    assert_eq!(
        build_error(&err),
        Some(&BuildError::CameraCount {
            expected: 2,
            actual: 1
        })
    );
}

#[rstest]
fn resolution_must_match_descriptor() {
    let dir = agent_dir(1, 160, 120, 0.1);
    let err = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .agent(load_agent(dir.path()).unwrap())
        .build()
        .expect_err("should be rejected");
    assert!(format!("{err}").contains("resolution"));
}

#[rstest]
fn descriptor_period_applies_unless_overridden() {
    let dir = agent_dir(1, 4, 3, 0.25);
    let lp = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .agent(load_agent(dir.path()).unwrap())
        .build()
        .unwrap();
    assert_eq!(lp.delta_frame(), Duration::from_millis(250));

    let lp = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .agent(load_agent(dir.path()).unwrap())
        .delta_frame(Duration::from_millis(50))
        .build()
        .unwrap();
    assert_eq!(lp.delta_frame(), Duration::from_millis(50));
}

#[rstest]
fn period_falls_back_to_four_tenths_of_a_second() {
    let lp = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .build()
        .unwrap();
    assert_eq!(lp.delta_frame(), Duration::from_millis(400));
}

#[rstest]
fn descriptor_bounds_become_native_limits() {
    let dir = agent_dir(1, 4, 3, 0.1);
    let lp = FrameTimingLoop::builder()
        .rig(rig(1, 4, 3))
        .channel(channel())
        .agent(load_agent(dir.path()).unwrap())
        .build()
        .unwrap();
    let s = lp.calibration().snapshot();
    assert_eq!(s.default_max_steer, 0.5);
    assert_eq!(s.default_throttle_limit, 0.4);
}
