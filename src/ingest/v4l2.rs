//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing stills from local V4L2
//! devices (USB cameras, the Raspberry Pi camera through its V4L2 driver).
//!
//! The device is opened for every capture and closed right after it:
//! - `open` opens the device node and negotiates the format
//! - `read_frame` streams until one usable buffer arrives, then stops the stream
//! - `close` drops the device handle
//!
//! Drivers often cannot deliver the requested size exactly; whatever they
//! negotiate is converted to RGB and scaled to the configured size, so frames
//! always match the model input.
//!
//! A missing or inaccessible device node is reported as a fatal capture error.
//! Everything else (busy device, dequeue timeout) is transient.

use std::io::ErrorKind;

use super::normalize::{normalize_to_rgb, resize_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 320,
            height: 320,
        }
    }
}

/// Buffers dropped after stream start while exposure settles.
const WARMUP_FRAMES: usize = 2;

struct OpenDevice {
    device: v4l::Device,
    width: u32,
    height: u32,
    format: PixelFormat,
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<OpenDevice>,
    stats: SourceStats,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            config,
            state: None,
            stats: SourceStats::default(),
        }
    }

    fn open_device(&self) -> Result<OpenDevice> {
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device).map_err(|err| {
            let message = format!("open v4l2 device {}: {}", self.config.device, err);
            match err.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    DetectError::capture_fatal(message)
                }
                _ => DetectError::capture(message),
            }
        })?;

        let mut format = device
            .format()
            .map_err(|e| DetectError::capture(format!("read v4l2 format: {}", e)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device.format().map_err(|e| {
                    DetectError::capture(format!("read v4l2 format after set failure: {}", e))
                })?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            DetectError::capture_fatal(format!(
                "{} only offers unsupported pixel format {}",
                self.config.device, format.fourcc
            ))
        })?;

        if (format.width, format.height) != (self.config.width, self.config.height) {
            log::debug!(
                "V4l2Source: {} negotiated {}x{}, scaling to {}x{}",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }

        Ok(OpenDevice {
            device,
            width: format.width,
            height: format.height,
            format: pixel_format,
        })
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn open(&mut self) -> Result<()> {
        self.stats.opens += 1;
        let state = self.open_device()?;
        log::debug!(
            "V4l2Source: opened {} ({}x{} {:?})",
            self.config.device,
            state.width,
            state.height,
            state.format
        );
        self.state = Some(state);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DetectError::capture(format!("{} is not open", self.config.device)))?;

        let raw = {
            let mut stream =
                v4l::prelude::MmapStream::with_buffers(&mut state.device, Type::VideoCapture, 4)
                    .map_err(|e| DetectError::capture(format!("create v4l2 stream: {}", e)))?;
            let mut raw = Vec::new();
            for _ in 0..=WARMUP_FRAMES {
                let (buf, meta) = stream
                    .next()
                    .map_err(|e| DetectError::capture(format!("capture v4l2 frame: {}", e)))?;
                let used = (meta.bytesused as usize).min(buf.len());
                raw.clear();
                raw.extend_from_slice(&buf[..used]);
            }
            raw
        };

        let frame = model_frame(
            &raw,
            (state.width, state.height),
            state.format,
            (self.config.width, self.config.height),
        )?;
        self.stats.frames_captured += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::trace!("V4l2Source: closed {}", self.config.device);
        }
        self.stats.closes += 1;
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

/// Convert a raw buffer of the negotiated size and format into an RGB frame
/// of the configured size.
fn model_frame(
    raw: &[u8],
    (width, height): (u32, u32),
    format: PixelFormat,
    (target_width, target_height): (u32, u32),
) -> Result<Frame> {
    let rgb = normalize_to_rgb(raw, width, height, format)?;
    let rgb = resize_rgb(rgb, width, height, target_width, target_height)?;
    Frame::from_rgb(rgb, target_width, target_height)
}
