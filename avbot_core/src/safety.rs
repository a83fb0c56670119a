//! Safety watchdogs: blank/covered camera detection and control-link
//! presence polling. Both only request a disengage; the loop acts on it.
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use avbot_traits::{Frame, PortEnumerator};
use crossbeam_channel as xch;

use crate::error::DisengageCause;
use crate::hw_error::map_hw_error;

/// Integer BT.601 luma, rounded.
#[inline]
fn gray([r, g, b]: [u8; 3]) -> u32 {
    (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000
}

/// A frame is blank when every pixel equals the top-left one, or covered
/// when more than `fraction` of its pixels have gray level `<= threshold`.
/// An empty frame counts as blank.
pub fn is_blank_or_covered(frame: &Frame, threshold: u8, fraction: f32) -> bool {
    let mut pixels = frame.pixels();
    let Some(first) = pixels.next() else {
        return true;
    };
    let thr = u32::from(threshold);
    let mut uniform = true;
    let mut dark = usize::from(gray(first) <= thr);
    for p in pixels {
        uniform &= p == first;
        if gray(p) <= thr {
            dark += 1;
        }
    }
    if uniform {
        return true;
    }
    dark as f64 / frame.pixel_count() as f64 > f64::from(fraction)
}

/// Counts consecutive blank classifications while actuation is active.
#[derive(Debug, Clone)]
pub struct BlankWatch {
    limit: u32,
    count: u32,
    blanked: bool,
}

impl BlankWatch {
    /// Trips once the count exceeds `limit`.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: 0,
            blanked: false,
        }
    }

    /// Feed one classification. Returns true when a disengage is due; the
    /// counter restarts after tripping.
    pub fn observe(&mut self, blank: bool, engaged: bool) -> bool {
        if !blank {
            self.count = 0;
            self.blanked = false;
            return false;
        }
        self.blanked = true;
        if !engaged {
            return false;
        }
        self.count += 1;
        if self.count > self.limit {
            self.count = 0;
            return true;
        }
        false
    }

    /// Treat the camera as blank until a clean frame is seen.
    pub fn mark_blanked(&mut self) {
        self.count = 0;
        self.blanked = true;
    }

    pub fn is_blanked(&self) -> bool {
        self.blanked
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Polls the host's serial device list on its own thread and reports, once,
/// when the watched port disappears.
///
/// Dropping the watchdog stops and joins the poll thread.
pub struct LinkWatchdog {
    port: String,
    stop: Option<xch::Sender<()>>,
    lost: xch::Receiver<String>,
    join: Option<JoinHandle<()>>,
}

impl LinkWatchdog {
    pub fn spawn(
        port: impl Into<String>,
        ports: Arc<dyn PortEnumerator + Send + Sync>,
        poll: Duration,
    ) -> Self {
        let port = port.into();
        let (stop_tx, stop_rx) = xch::bounded::<()>(0);
        let (lost_tx, lost_rx) = xch::bounded::<String>(1);
        let watched = port.clone();

        let join = std::thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(poll) {
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    // Stop requested or owner dropped.
                    _ => break,
                }
                match ports.ports() {
                    Ok(list) if list.iter().any(|p| *p == watched) => {
                        tracing::trace!(port = %watched, "control link present");
                    }
                    Ok(_) => {
                        tracing::warn!(port = %watched, "control link disappeared");
                        let _ = lost_tx.try_send(watched.clone());
                        break;
                    }
                    Err(e) => {
                        let err = map_hw_error(e.as_ref());
                        tracing::warn!(port = %watched, error = %err, "port enumeration failed");
                    }
                }
            }
            tracing::trace!(port = %watched, "link watchdog exiting");
        });

        tracing::debug!(port = %port, ?poll, "link watchdog armed");
        Self {
            port,
            stop: Some(stop_tx),
            lost: lost_rx,
            join: Some(join),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Non-blocking: the lost port, if the watchdog has fired.
    pub fn try_lost(&self) -> Option<String> {
        self.lost.try_recv().ok()
    }

    /// Receiver for select-style waiting on the loss event.
    pub fn lost_events(&self) -> &xch::Receiver<String> {
        &self.lost
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for LinkWatchdog {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the poll thread immediately.
        self.stop.take();
        if let Some(handle) = self.join.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(port = %self.port, "link watchdog joined"),
                Err(e) => tracing::warn!(?e, "link watchdog panicked during shutdown"),
            }
        }
    }
}

/// Observable safety state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyState {
    pub camera_blanked: bool,
    pub consecutive_blank_count: u32,
    pub control_link_present: bool,
}

/// Blank detector settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlankDetector {
    pub threshold: u8,
    pub fraction: f32,
}

impl Default for BlankDetector {
    fn default() -> Self {
        Self {
            threshold: 45,
            fraction: 0.5,
        }
    }
}

/// Both watchdogs behind one interface for the loop.
pub struct SafetyMonitor {
    detector: BlankDetector,
    blank: BlankWatch,
    ports: Option<Arc<dyn PortEnumerator + Send + Sync>>,
    poll: Duration,
    link: Option<LinkWatchdog>,
    link_present: bool,
}

impl SafetyMonitor {
    pub fn new(detector: BlankDetector, max_consecutive_blank: u32) -> Self {
        Self {
            detector,
            blank: BlankWatch::new(max_consecutive_blank),
            ports: None,
            poll: Duration::from_secs(1),
            link: None,
            link_present: true,
        }
    }

    /// Enable link watching through `ports`, polled every `poll`.
    pub fn with_link_watch(
        mut self,
        ports: Arc<dyn PortEnumerator + Send + Sync>,
        poll: Duration,
    ) -> Self {
        self.ports = Some(ports);
        self.poll = poll;
        self
    }

    /// Classify the primary frame. Returns a cause when a disengage is due.
    pub fn check_frame(&mut self, primary: Option<&Frame>, engaged: bool) -> Option<DisengageCause> {
        let blank = primary.is_none_or(|f| {
            is_blank_or_covered(f, self.detector.threshold, self.detector.fraction)
        });
        if blank {
            tracing::debug!(count = self.blank.count(), engaged, "blank frame");
        }
        self.blank
            .observe(blank, engaged)
            .then_some(DisengageCause::CameraBlanked)
    }

    /// Start watching `port` if link watching is enabled.
    pub fn arm_link(&mut self, port: &str) {
        self.disarm_link();
        self.link_present = true;
        if let Some(ports) = &self.ports {
            self.link = Some(LinkWatchdog::spawn(port, ports.clone(), self.poll));
        }
    }

    /// Stop and join the link watchdog, if armed.
    pub fn disarm_link(&mut self) {
        if let Some(w) = self.link.take() {
            tracing::debug!(port = w.port(), "link watchdog disarmed");
        }
    }

    pub fn link_armed(&self) -> bool {
        self.link.is_some()
    }

    /// Non-blocking check for a link loss event.
    pub fn poll_link(&mut self) -> Option<DisengageCause> {
        let lost = self.link.as_ref()?.try_lost()?;
        tracing::error!(port = %lost, "control link lost");
        self.link_present = false;
        self.disarm_link();
        Some(DisengageCause::LinkLost)
    }

    pub fn mark_blanked(&mut self) {
        self.blank.mark_blanked();
    }

    pub fn camera_blanked(&self) -> bool {
        self.blank.is_blanked()
    }

    pub fn state(&self) -> SafetyState {
        SafetyState {
            camera_blanked: self.blank.is_blanked(),
            consecutive_blank_count: self.blank.count(),
            control_link_present: self.link_present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avbot_hardware::SimulatedBus;
    use rstest::rstest;

    fn textured(w: u32, h: u32) -> Frame {
        let mut f = Frame::zeroed(w, h);
        for y in 0..h {
            for x in 0..w {
                let v = (60 + (x * 13 + y * 7) % 150) as u8;
                f.set_pixel(x, y, [v, v, v]);
            }
        }
        f
    }

    #[test]
    fn uniform_frame_is_blank_even_when_bright() {
        assert!(is_blank_or_covered(&Frame::filled(8, 8, [200, 200, 200]), 45, 0.5));
    }

    #[test]
    fn textured_frame_is_clear() {
        assert!(!is_blank_or_covered(&textured(8, 8), 45, 0.5));
    }

    #[rstest]
    // 33 of 64 pixels dark: just over half.
    #[case(33, true)]
    // Exactly half is not more than half.
    #[case(32, false)]
    fn dark_fraction_threshold(#[case] dark: u32, #[case] covered: bool) {
        let mut f = textured(8, 8);
        for i in 0..dark {
            f.set_pixel(i % 8, i / 8, [10, 20, 30]);
        }
        assert_eq!(is_blank_or_covered(&f, 45, 0.5), covered);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut f = Frame::filled(2, 1, [45, 45, 45]);
        f.set_pixel(1, 0, [46, 46, 46]);
        // One of two pixels at the threshold: 50%, not covered.
        assert!(!is_blank_or_covered(&f, 45, 0.5));
        assert!(is_blank_or_covered(&f, 46, 0.4));
    }

    #[test]
    fn empty_frame_is_blank() {
        assert!(is_blank_or_covered(&Frame::zeroed(0, 0), 45, 0.5));
    }

    #[test]
    fn two_blank_cycles_trip_once() {
        let mut w = BlankWatch::new(1);
        assert!(!w.observe(true, true));
        assert!(w.observe(true, true));
        assert_eq!(w.count(), 0);
        assert!(!w.observe(true, true));
    }

    #[test]
    fn single_blank_then_clear_never_trips() {
        let mut w = BlankWatch::new(1);
        assert!(!w.observe(true, true));
        assert!(!w.observe(false, true));
        assert!(!w.observe(true, true));
        assert_eq!(w.count(), 1);
    }

    #[test]
    fn blanks_while_disengaged_do_not_count() {
        let mut w = BlankWatch::new(1);
        for _ in 0..5 {
            assert!(!w.observe(true, false));
        }
        assert!(w.is_blanked());
        assert_eq!(w.count(), 0);
    }

    #[test]
    fn mark_blanked_holds_until_clear_frame() {
        let mut w = BlankWatch::new(1);
        w.mark_blanked();
        assert!(w.is_blanked());
        w.observe(false, false);
        assert!(!w.is_blanked());
    }

    #[test]
    fn watchdog_reports_loss_once() {
        let bus = SimulatedBus::with_ports(["/dev/ttyUSB0"]);
        let w = LinkWatchdog::spawn("/dev/ttyUSB0", Arc::new(bus.clone()), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(40));
        assert!(w.try_lost().is_none());
        bus.unplug("/dev/ttyUSB0");
        let lost = w.lost_events().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(lost, "/dev/ttyUSB0");
        assert!(w.lost_events().recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn dropping_watchdog_joins_promptly() {
        let bus = SimulatedBus::with_ports(["/dev/ttyUSB0"]);
        let w = LinkWatchdog::spawn("/dev/ttyUSB0", Arc::new(bus), Duration::from_secs(60));
        assert!(w.is_running());
        let t0 = std::time::Instant::now();
        drop(w);
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn monitor_reports_link_loss_and_state() {
        let bus = SimulatedBus::with_ports(["/dev/ttyUSB0"]);
        let mut m = SafetyMonitor::new(BlankDetector::default(), 1)
            .with_link_watch(Arc::new(bus.clone()), Duration::from_millis(10));
        m.arm_link("/dev/ttyUSB0");
        assert!(m.link_armed());
        bus.unplug("/dev/ttyUSB0");
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let mut cause = None;
        while cause.is_none() && std::time::Instant::now() < deadline {
            cause = m.poll_link();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cause, Some(DisengageCause::LinkLost));
        assert!(!m.state().control_link_present);
        assert!(!m.link_armed());
    }

    #[test]
    fn missing_primary_frame_counts_as_blank() {
        let mut m = SafetyMonitor::new(BlankDetector::default(), 1);
        assert_eq!(m.check_frame(None, true), None);
        assert_eq!(m.check_frame(None, true), Some(DisengageCause::CameraBlanked));
    }
}
