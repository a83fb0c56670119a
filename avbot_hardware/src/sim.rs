//! Simulated cameras and serial bus for running the loop without a vehicle.

use avbot_traits::{BoxError, Camera, Frame, PortEnumerator, SerialOpener, SerialPort};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::HwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPattern {
    /// Horizontal gradient that scrolls one column per frame.
    Gradient,
    /// Every pixel the same value (reads as a blanked camera).
    Uniform([u8; 3]),
    /// Mostly black with a bright stripe (reads as a covered lens).
    Dark,
    /// Every read fails.
    Fail,
}

pub struct SimulatedCamera {
    width: u32,
    height: u32,
    pattern: SimPattern,
    tick: u32,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32, pattern: SimPattern) -> Self {
        Self {
            width,
            height,
            pattern,
            tick: 0,
        }
    }
}

impl Camera for SimulatedCamera {
    fn read(&mut self, _timeout: Duration) -> Result<Frame, BoxError> {
        self.tick = self.tick.wrapping_add(1);
        let (w, h) = (self.width, self.height);
        let frame = match self.pattern {
            SimPattern::Fail => return Err(Box::new(HwError::Timeout)),
            SimPattern::Uniform(rgb) => Frame::filled(w, h, rgb),
            SimPattern::Gradient => {
                let mut f = Frame::zeroed(w, h);
                let span = w.max(1);
                for y in 0..h {
                    for x in 0..w {
                        let v = (((x + self.tick) % span) * 255 / span) as u8;
                        f.set_pixel(x, y, [v, v / 2 + 64, 255 - v]);
                    }
                }
                f
            }
            SimPattern::Dark => {
                let mut f = Frame::filled(w, h, [8, 8, 8]);
                for x in 0..w {
                    f.set_pixel(x, 0, [240, 240, 240]);
                }
                f
            }
        };
        trace!(tick = self.tick, "simulated frame");
        Ok(frame)
    }
}

#[derive(Debug, Default)]
struct BusState {
    present: Vec<String>,
    written: Vec<(String, Vec<u8>)>,
    flushes: usize,
    input_clears: usize,
}

/// In-memory stand-in for the host's serial devices.
///
/// Clones share state, so a test can hold one handle while the channel and
/// watchdog hold others, then `unplug` a device mid-run.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bus = Self::default();
        for p in ports {
            bus.plug(p);
        }
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn plug(&self, port: impl Into<String>) {
        let port = port.into();
        let mut s = self.lock();
        if !s.present.contains(&port) {
            s.present.push(port);
        }
    }

    pub fn unplug(&self, port: &str) {
        self.lock().present.retain(|p| p != port);
        debug!(port, "simulated port unplugged");
    }

    pub fn is_present(&self, port: &str) -> bool {
        self.lock().present.iter().any(|p| p == port)
    }

    /// Every packet written to `port`, oldest first.
    pub fn written_to(&self, port: &str) -> Vec<Vec<u8>> {
        self.lock()
            .written
            .iter()
            .filter(|(p, _)| p == port)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    pub fn input_clears(&self) -> usize {
        self.lock().input_clears
    }
}

struct SimulatedLink {
    port: String,
    bus: SimulatedBus,
}

impl SimulatedLink {
    fn ensure_present(&self) -> Result<(), BoxError> {
        if self.bus.is_present(&self.port) {
            Ok(())
        } else {
            Err(Box::new(HwError::Disconnected))
        }
    }
}

impl SerialPort for SimulatedLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        self.ensure_present()?;
        self.bus
            .lock()
            .written
            .push((self.port.clone(), bytes.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BoxError> {
        self.ensure_present()?;
        self.bus.lock().flushes += 1;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), BoxError> {
        self.ensure_present()?;
        self.bus.lock().input_clears += 1;
        Ok(())
    }
}

impl SerialOpener for SimulatedBus {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialPort + Send>, BoxError> {
        if !self.is_present(port) {
            return Err(Box::new(HwError::PortNotFound(port.to_string())));
        }
        debug!(port, baud, "simulated port opened");
        Ok(Box::new(SimulatedLink {
            port: port.to_string(),
            bus: self.clone(),
        }))
    }
}

impl PortEnumerator for SimulatedBus {
    fn ports(&self) -> Result<Vec<String>, BoxError> {
        Ok(self.lock().present.clone())
    }
}
