//! Running cycle-latency statistics over published telemetry.
use std::time::Duration;

use crate::control_loop::Telemetry;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    pub cycles: u64,
    pub overruns: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    total: Duration,
}

impl CycleStats {
    pub fn record(&mut self, t: &Telemetry) {
        let d = t.cycle_time;
        self.cycles += 1;
        if t.overrun {
            self.overruns += 1;
        }
        self.min = Some(self.min.map_or(d, |m| m.min(d)));
        self.max = Some(self.max.map_or(d, |m| m.max(d)));
        self.total = self.total.saturating_add(d);
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.cycles == 0 {
            return None;
        }
        let n = u32::try_from(self.cycles).unwrap_or(u32::MAX);
        Some(self.total / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: u64, overrun: bool) -> Telemetry {
        Telemetry {
            cycle_time: Duration::from_millis(ms),
            overrun,
            ..Telemetry::cleared(0)
        }
    }

    #[test]
    fn tracks_min_mean_max_and_overruns() {
        let mut s = CycleStats::default();
        assert_eq!(s.mean(), None);
        s.record(&t(100, false));
        s.record(&t(300, true));
        s.record(&t(200, false));
        assert_eq!(s.min, Some(Duration::from_millis(100)));
        assert_eq!(s.max, Some(Duration::from_millis(300)));
        assert_eq!(s.mean(), Some(Duration::from_millis(200)));
        assert_eq!(s.overruns, 1);
    }
}
