//! Fixed set of camera slots read once per cycle.
use std::time::Duration;

use avbot_traits::{Camera, Frame, FrameSet};

use crate::error::{AvError, Result};
use crate::hw_error::map_hw_error;

struct Slot {
    device: String,
    camera: Box<dyn Camera + Send>,
}

/// Cameras by position. Position is stable for the rig's lifetime; a missing
/// or failing camera contributes an all-zero frame of the rig's resolution.
pub struct CameraRig {
    slots: Vec<Option<Slot>>,
    width: u32,
    height: u32,
    read_timeout: Duration,
}

impl std::fmt::Debug for CameraRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let devices: Vec<Option<&str>> = self
            .slots
            .iter()
            .map(|s| s.as_ref().map(|s| s.device.as_str()))
            .collect();
        f.debug_struct("CameraRig")
            .field("devices", &devices)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl CameraRig {
    pub fn new(slots: usize, width: u32, height: u32, read_timeout: Duration) -> Self {
        Self {
            slots: (0..slots).map(|_| None).collect(),
            width,
            height,
            read_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Put `camera` at `pos`. A device already assigned to another slot is
    /// released there first.
    pub fn assign(
        &mut self,
        pos: usize,
        device: impl Into<String>,
        camera: Box<dyn Camera + Send>,
    ) -> Result<()> {
        let device = device.into();
        if pos >= self.slots.len() {
            return Err(AvError::Config(format!(
                "camera slot {pos} out of range (rig has {})",
                self.slots.len()
            ))
            .into());
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != pos && slot.as_ref().is_some_and(|s| s.device == device) {
                tracing::info!(device = %device, from = i, to = pos, "camera moved");
                *slot = None;
            }
        }
        tracing::debug!(device = %device, pos, "camera assigned");
        self.slots[pos] = Some(Slot { device, camera });
        Ok(())
    }

    pub fn release(&mut self, pos: usize) {
        if let Some(Some(slot)) = self.slots.get_mut(pos).map(Option::take) {
            tracing::debug!(device = %slot.device, pos, "camera released");
        }
    }

    pub fn device(&self, pos: usize) -> Option<&str> {
        self.slots.get(pos)?.as_ref().map(|s| s.device.as_str())
    }

    /// First slot without a camera.
    pub fn unassigned(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Read every slot once.
    pub fn read_all(&mut self) -> FrameSet {
        let (w, h, timeout) = (self.width, self.height, self.read_timeout);
        let frames = self
            .slots
            .iter_mut()
            .enumerate()
            .map(|(pos, slot)| {
                let Some(slot) = slot else {
                    return Frame::zeroed(w, h);
                };
                match slot.camera.read(timeout) {
                    Ok(f) if f.width() == w && f.height() == h => f,
                    Ok(f) => {
                        tracing::warn!(
                            pos,
                            got = ?(f.width(), f.height()),
                            want = ?(w, h),
                            "camera frame has wrong resolution"
                        );
                        Frame::zeroed(w, h)
                    }
                    Err(e) => {
                        let err = map_hw_error(e.as_ref());
                        tracing::warn!(pos, device = %slot.device, error = %err, "camera read failed");
                        Frame::zeroed(w, h)
                    }
                }
            })
            .collect();
        FrameSet::new(frames)
    }
}
