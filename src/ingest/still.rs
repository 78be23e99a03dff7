//! Still image frame source.
//!
//! Decodes an image file on every capture and resizes it to the model input.
//! Useful with tools that drop a fresh snapshot on disk (e.g. `libcamera-still`)
//! and for replaying a fixed scene.

use std::path::PathBuf;

use image::imageops::FilterType;

use crate::error::{DetectError, Result};
use crate::frame::Frame;

use super::{FrameSource, SourceStats};

pub struct StillImageSource {
    path: PathBuf,
    name: String,
    width: u32,
    height: u32,
    decoded: Option<image::RgbImage>,
    stats: SourceStats,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            width,
            height,
            decoded: None,
            stats: SourceStats::default(),
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        self.stats.opens += 1;
        let image = image::open(&self.path).map_err(|err| match err {
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                DetectError::capture(format!("{} not found", self.name))
            }
            other => DetectError::capture(format!("failed to decode {}: {}", self.name, other)),
        })?;
        let rgb = if image.width() == self.width && image.height() == self.height {
            image.into_rgb8()
        } else {
            image::imageops::resize(
                &image.into_rgb8(),
                self.width,
                self.height,
                FilterType::Triangle,
            )
        };
        self.decoded = Some(rgb);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let rgb = self
            .decoded
            .take()
            .ok_or_else(|| DetectError::capture(format!("{} is not open", self.name)))?;
        let (width, height) = rgb.dimensions();
        self.stats.frames_captured += 1;
        Frame::from_rgb(rgb.into_raw(), width, height)
    }

    fn close(&mut self) {
        self.decoded = None;
        self.stats.closes += 1;
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_source_resizes_to_model_input() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let mut source = StillImageSource::new(&path, 32, 32);
        let frame = source.capture()?;
        assert_eq!(frame.dimensions(), (32, 32));
        assert_eq!(&frame.pixels()[..3], &[10, 20, 30]);
        assert_eq!(source.stats().closes, 1);
        Ok(())
    }

    #[test]
    fn missing_file_is_transient_capture_error() {
        let mut source = StillImageSource::new("/nonexistent/frame.jpg", 32, 32);
        let err = source.capture().unwrap_err();
        assert!(matches!(err, DetectError::Capture { fatal: false, .. }));
        assert_eq!(source.stats().opens, 1);
        assert_eq!(source.stats().closes, 1);
    }
}
