//! Synthetic frame source (`stub://...`) for tests and dry runs.

use crate::error::{DetectError, Result};
use crate::frame::Frame;

use super::{FrameSource, SourceStats};

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    is_open: bool,
    stats: SourceStats,
}

impl SyntheticSource {
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            is_open: false,
            stats: SourceStats::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Frame `n` is filled with the byte `n % 256`.
    fn fill_pixels(&self) -> Result<Vec<u8>> {
        let len = crate::frame::rgb_len(self.width, self.height)?;
        Ok(vec![(self.stats.frames_captured % 256) as u8; len])
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Err(DetectError::capture(format!("{} is already open", self.url)));
        }
        self.is_open = true;
        self.stats.opens += 1;
        log::trace!("SyntheticSource: opened {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.is_open {
            return Err(DetectError::capture(format!("{} is not open", self.url)));
        }
        let pixels = self.fill_pixels()?;
        self.stats.frames_captured += 1;
        Frame::from_rgb(pixels, self.width, self.height)
    }

    fn close(&mut self) {
        if self.is_open {
            self.is_open = false;
            self.stats.closes += 1;
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
