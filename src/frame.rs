//! Captured frames.
//!
//! A `Frame` is a tightly packed RGB24 buffer (row-major, 3 bytes per pixel).
//! Frames are produced by a `FrameSource`, handed to the `Detector` once, and
//! dropped after the detection pass.

use crate::error::{DetectError, Result};

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(DetectError::capture(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Byte length of an RGB24 buffer, rejecting overflowing dimensions.
pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| DetectError::capture("frame dimensions overflow"))
}
