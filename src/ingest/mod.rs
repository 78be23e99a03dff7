//! Frame sources.
//!
//! This module provides the sources the detection loop captures from:
//! - Synthetic frames (`stub://...`, testing)
//! - Still image files (feature: ingest-image)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! A source is held open only for the duration of one capture. `capture()`
//! opens the source, reads one frame and closes it again through
//! `SourceGuard`, which releases the device on every exit path.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-image")]
pub mod still;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

#[cfg(feature = "ingest-image")]
pub use still::StillImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use crate::error::{DetectError, Result};
use crate::frame::Frame;

/// Counters shared by all sources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub opens: u64,
    pub closes: u64,
    pub frames_captured: u64,
}

/// Something that can produce one frame on demand.
pub trait FrameSource: Send {
    /// Source identifier (device path, file path, stub URL).
    fn name(&self) -> &str;

    /// Acquire the underlying device.
    fn open(&mut self) -> Result<()>;

    /// Read one frame. Only valid between `open` and `close`.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release the underlying device. Must be safe to call after a failed open.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;

    /// Open, read one frame, close.
    fn capture(&mut self) -> Result<Frame> {
        let mut guard = SourceGuard::acquire(self)?;
        guard.read_frame()
    }
}

/// Scoped acquisition of a `FrameSource`. Closes the source on drop.
pub struct SourceGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> SourceGuard<'a, S> {
    pub fn acquire(source: &'a mut S) -> Result<Self> {
        if let Err(err) = source.open() {
            source.close();
            return Err(err);
        }
        Ok(Self { source })
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        self.source.read_frame()
    }
}

impl<S: FrameSource + ?Sized> Drop for SourceGuard<'_, S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

/// Pick a source for a device string.
///
/// - `stub://...` -> `SyntheticSource`
/// - a path with an image extension -> `StillImageSource`
/// - anything else -> `V4l2Source`
pub fn open_source(device: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    if device.trim().is_empty() {
        return Err(DetectError::capture_fatal("no camera device configured"));
    }
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(device, width, height)));
    }
    if is_image_path(device) {
        #[cfg(feature = "ingest-image")]
        {
            return Ok(Box::new(StillImageSource::new(device, width, height)));
        }
        #[cfg(not(feature = "ingest-image"))]
        {
            return Err(DetectError::capture_fatal(
                "image sources require the ingest-image feature",
            ));
        }
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(V4l2Config {
            device: device.to_string(),
            width,
            height,
        })))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(DetectError::capture_fatal(format!(
            "camera {} requires the ingest-v4l2 feature",
            device
        )))
    }
}

fn is_image_path(device: &str) -> bool {
    let lower = device.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
