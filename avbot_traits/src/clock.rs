use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock shared by the control loop, calibration delay and watchdogs.
///
/// - now(): returns a monotonic Instant
/// - sleep(): suspends for the provided duration (implementations may simulate)
/// - since(): elapsed duration from an earlier Instant, saturating at zero
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Duration elapsed since `earlier`, zero if `earlier` is in the future.
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Real-time clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod manual {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct State {
        offset: Duration,
        slept: Duration,
        sleeps: usize,
    }

    /// Deterministic clock whose time only moves when told to.
    ///
    /// now() = origin + offset
    /// sleep(d) advances the offset by d and records it, without blocking.
    /// Clones share the same timeline.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        origin: Instant,
        state: Arc<Mutex<State>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                state: Arc::new(Mutex::new(State::default())),
            }
        }

        /// Advance time without counting it as a sleep (simulated work).
        pub fn advance(&self, d: Duration) {
            if let Ok(mut s) = self.state.lock() {
                s.offset = s.offset.saturating_add(d);
            }
        }

        /// Total virtual time spent in sleep().
        pub fn slept(&self) -> Duration {
            self.state.lock().map(|s| s.slept).unwrap_or_default()
        }

        /// Number of non-zero sleep() calls.
        pub fn sleeps(&self) -> usize {
            self.state.lock().map(|s| s.sleeps).unwrap_or_default()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            let off = self.state.lock().map(|s| s.offset).unwrap_or_default();
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            if d.is_zero() {
                return;
            }
            if let Ok(mut s) = self.state.lock() {
                s.offset = s.offset.saturating_add(d);
                s.slept = s.slept.saturating_add(d);
                s.sleeps += 1;
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sleep_advances_and_is_recorded() {
            let clock = ManualClock::new();
            let t0 = clock.now();
            clock.advance(Duration::from_millis(100));
            clock.sleep(Duration::from_millis(300));
            clock.sleep(Duration::ZERO);
            assert_eq!(clock.since(t0), Duration::from_millis(400));
            assert_eq!(clock.slept(), Duration::from_millis(300));
            assert_eq!(clock.sleeps(), 1);
        }

        #[test]
        fn clones_share_a_timeline() {
            let a = ManualClock::new();
            let b = a.clone();
            b.advance(Duration::from_secs(1));
            assert_eq!(a.now(), b.now());
        }
    }
}
