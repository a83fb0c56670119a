//! Emergency disengage from the blank detector and the link watchdog.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use avbot_core::{
    BlankDetector, CameraRig, DisengageCause, FrameTimingLoop, LoopEvent, LoopMode, ManualCommand,
    SafetyMonitor, SerialActuatorChannel,
};
use avbot_hardware::SimulatedBus;
use avbot_traits::clock::manual::ManualClock;
use avbot_traits::{Camera, Clock, Frame, MonotonicClock};

const PORT: &str = "/dev/ttyUSB0";

/// Camera that shows a uniform gray frame while `blank` is set.
struct ToggleCamera {
    blank: Arc<AtomicBool>,
}

impl Camera for ToggleCamera {
    fn read(&mut self, _timeout: Duration) -> Result<Frame, Box<dyn Error + Send + Sync>> {
        if self.blank.load(Ordering::SeqCst) {
            return Ok(Frame::filled(8, 6, [120, 120, 120]));
        }
        let mut f = Frame::zeroed(8, 6);
        for y in 0..6 {
            for x in 0..8 {
                let v = (80 + x * 15 + y * 5) as u8;
                f.set_pixel(x, y, [v, v, v]);
            }
        }
        Ok(f)
    }
}

struct Rigged {
    lp: FrameTimingLoop,
    bus: SimulatedBus,
    blank: Arc<AtomicBool>,
}

fn rigged(poll: Duration) -> Rigged {
    rigged_with(poll, Arc::new(ManualClock::new()), Duration::from_secs(2))
}

fn rigged_with(
    poll: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
    brake_hold: Duration,
) -> Rigged {
    let bus = SimulatedBus::with_ports([PORT]);
    let blank = Arc::new(AtomicBool::new(false));
    let mut rig = CameraRig::new(1, 8, 6, Duration::from_millis(5));
    rig.assign(
        0,
        "toggle",
        Box::new(ToggleCamera {
            blank: blank.clone(),
        }),
    )
    .unwrap();
    let mut channel = SerialActuatorChannel::new(Arc::new(bus.clone()), 115_200);
    assert!(channel.set_port(PORT));
    let mut lp = FrameTimingLoop::builder()
        .rig(rig)
        .channel(channel)
        .safety(
            SafetyMonitor::new(BlankDetector::default(), 1)
                .with_link_watch(Arc::new(bus.clone()), poll),
        )
        .delta_frame(Duration::from_millis(100))
        .clock(clock)
        .engage_settle(Duration::ZERO)
        .brake_hold(brake_hold)
        .telemetry_capacity(1024)
        .build()
        .unwrap();
    lp.set_mode(LoopMode::ManualOverride(ManualCommand::Forward))
        .unwrap();
    Rigged { lp, bus, blank }
}

fn disengages(events: &crossbeam_channel::Receiver<LoopEvent>) -> Vec<DisengageCause> {
    events
        .try_iter()
        .filter_map(|e| match e {
            LoopEvent::Disengaged(c) => Some(c),
            _ => None,
        })
        .collect()
}

#[test]
fn engaged_cycles_send_calibrated_packets() {
    let mut r = rigged(Duration::from_secs(60));
    r.lp.engage().unwrap();
    r.lp.step();
    let written = r.bus.written_to(PORT);
    assert_eq!(written[0], vec![36, 128, 0, 0, 0, 64], "neutral on engage");
    assert_eq!(written[1], ManualCommand::Forward.packet().to_vec());
}

#[test]
fn two_consecutive_blanks_disengage_once() {
    let mut r = rigged(Duration::from_secs(60));
    let events = r.lp.events();
    r.lp.engage().unwrap();
    r.blank.store(true, Ordering::SeqCst);
    r.lp.step();
    assert!(r.lp.is_engaged(), "one blank frame is tolerated");
    r.lp.step();
    assert!(!r.lp.is_engaged());
    for _ in 0..3 {
        r.lp.step();
    }
    assert_eq!(disengages(&events), vec![DisengageCause::CameraBlanked]);
    assert_eq!(r.lp.mode(), LoopMode::Idle);

    let written = r.bus.written_to(PORT);
    let n = written.len();
    assert_eq!(written[n - 2], vec![36, 128, 0, 255, 0, 64], "brake");
    assert_eq!(written[n - 1], vec![36, 128, 0, 0, 0, 64], "release");
}

#[test]
fn single_blank_then_clear_keeps_driving() {
    let mut r = rigged(Duration::from_secs(60));
    let events = r.lp.events();
    r.lp.engage().unwrap();
    for blank in [true, false, true, false] {
        r.blank.store(blank, Ordering::SeqCst);
        r.lp.step();
    }
    assert!(r.lp.is_engaged());
    assert!(disengages(&events).is_empty());
}

#[test]
fn camera_counts_as_blank_after_disengage_until_clear() {
    let mut r = rigged(Duration::from_secs(60));
    r.lp.engage().unwrap();
    r.lp.disengage(DisengageCause::Operator);
    assert!(r.lp.safety().camera_blanked());
    r.lp.step();
    assert!(!r.lp.safety().camera_blanked());
}

#[test]
fn link_loss_disengages_within_one_poll() {
    let poll = Duration::from_millis(1000);
    let mut r = rigged(poll);
    let events = r.lp.events();
    r.lp.engage().unwrap();
    r.bus.unplug(PORT);
    let t0 = Instant::now();
    while r.lp.is_engaged() && t0.elapsed() < Duration::from_secs(3) {
        r.lp.step();
        std::thread::sleep(Duration::from_millis(5));
    }
    let took = t0.elapsed();
    assert!(!r.lp.is_engaged());
    assert!(took <= poll + Duration::from_millis(500), "took {took:?}");
    assert!(!r.lp.channel().is_connected());
    assert!(!r.lp.safety().state().control_link_present);
    assert_eq!(disengages(&events), vec![DisengageCause::LinkLost]);
}

#[test]
fn watchdog_is_not_running_after_disengage() {
    let mut r = rigged(Duration::from_millis(20));
    let events = r.lp.events();
    r.lp.engage().unwrap();
    r.lp.disengage(DisengageCause::Operator);
    r.bus.unplug(PORT);
    std::thread::sleep(Duration::from_millis(80));
    r.lp.step();
    assert_eq!(disengages(&events), vec![DisengageCause::Operator]);
}

#[test]
fn link_loss_alert_is_not_held_back_by_the_brake_hold() {
    let poll = Duration::from_millis(200);
    let mut r = rigged_with(poll, Arc::new(MonotonicClock::new()), Duration::from_secs(2));
    let events = r.lp.events();
    r.lp.engage().unwrap();
    r.bus.unplug(PORT);
    let t0 = Instant::now();
    let mut seen = None;
    while seen.is_none() && t0.elapsed() < Duration::from_secs(5) {
        r.lp.step();
        seen = events
            .try_iter()
            .find(|e| matches!(e, LoopEvent::Disengaged(_)))
            .map(|_| t0.elapsed());
    }
    let took = seen.expect("disengage event published");
    assert!(took < poll + Duration::from_millis(500), "took {took:?}");
}

#[test]
fn disengage_is_published_before_the_brake_sequence() {
    let hold = Duration::from_millis(400);
    let mut r = rigged_with(Duration::from_secs(60), Arc::new(MonotonicClock::new()), hold);
    let events = r.lp.events();
    r.lp.engage().unwrap();

    let watcher = std::thread::spawn(move || {
        let t0 = Instant::now();
        loop {
            match events.recv_timeout(Duration::from_secs(5)) {
                Ok(LoopEvent::Disengaged(cause)) => return (cause, t0.elapsed()),
                Ok(_) => {}
                Err(e) => panic!("no disengage event: {e}"),
            }
        }
    });
    let t0 = Instant::now();
    r.lp.disengage(DisengageCause::Operator);
    let call = t0.elapsed();
    let (cause, heard) = watcher.join().unwrap();

    assert_eq!(cause, DisengageCause::Operator);
    assert!(call >= hold, "brake hold still runs: {call:?}");
    assert!(heard + Duration::from_millis(200) < call, "heard {heard:?}, call {call:?}");
    let written = r.bus.written_to(PORT);
    let n = written.len();
    assert_eq!(written[n - 2], vec![36, 128, 0, 255, 0, 64], "brake");
    assert_eq!(written[n - 1], vec![36, 128, 0, 0, 0, 64], "release");
}
