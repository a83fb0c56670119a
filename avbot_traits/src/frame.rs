//! Camera frames as seen by the control loop.

/// A single 3-channel (RGB, row-major, 8-bit) image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Bytes per pixel of every frame.
pub const CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShapeError {
    pub expected: usize,
    pub actual: usize,
}

impl std::fmt::Display for FrameShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame buffer has {} bytes, expected {}",
            self.actual, self.expected
        )
    }
}

impl std::error::Error for FrameShapeError {}

impl Frame {
    /// Wrap an RGB buffer; its length must be `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameShapeError> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(FrameShapeError {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// All-zero placeholder used when a camera is missing or failed.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Uniform frame filled with one RGB value.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let n = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(n * CHANNELS);
        for _ in 0..n {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn byte_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * CHANNELS
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Iterate pixels as `[r, g, b]`.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(CHANNELS).map(|p| [p[0], p[1], p[2]])
    }

    /// Pixel at (x, y), if in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }
}

/// One frame per camera position, produced once per cycle.
///
/// Index equals camera position. A missing camera still occupies its slot
/// with a zeroed frame so downstream shape checks never break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSet {
    frames: Vec<Frame>,
}

impl FrameSet {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// `n` zeroed frames of the given resolution.
    pub fn placeholders(n: usize, width: u32, height: u32) -> Self {
        Self {
            frames: (0..n).map(|_| Frame::zeroed(width, height)).collect(),
        }
    }

    /// Frame of the primary (position 0) camera.
    pub fn primary(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn get(&self, pos: usize) -> Option<&Frame> {
        self.frames.get(pos)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl<'a> IntoIterator for &'a FrameSet {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_wrong_length() {
        let err = Frame::from_rgb(2, 2, vec![0; 11]).unwrap_err();
        assert_eq!(err.expected, 12);
        assert_eq!(err.actual, 11);
    }

    #[test]
    fn placeholders_keep_shape() {
        let set = FrameSet::placeholders(3, 4, 2);
        assert_eq!(set.len(), 3);
        for f in &set {
            assert_eq!(f.as_bytes().len(), 24);
            assert!(f.as_bytes().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn pixel_roundtrip() {
        let mut f = Frame::zeroed(3, 3);
        f.set_pixel(2, 1, [1, 2, 3]);
        assert_eq!(f.pixel(2, 1), Some([1, 2, 3]));
        assert_eq!(f.pixel(3, 0), None);
    }
}
