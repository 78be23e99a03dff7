use image::imageops::FilterType;
use image::RgbImage;

use crate::error::{DetectError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = crate::frame::rgb_len(width, height)?;
            if pixels.len() != expected {
                return Err(DetectError::capture(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
    }
}

/// Scale packed RGB to `target_width x target_height`. Returns the input
/// untouched when it already has that size.
pub(crate) fn resize_rgb(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<u8>> {
    if (width, height) == (target_width, target_height) {
        return Ok(rgb);
    }
    let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        DetectError::capture(format!(
            "RGB buffer does not hold a {}x{} image",
            width, height
        ))
    })?;
    let resized =
        image::imageops::resize(&image, target_width, target_height, FilterType::Triangle);
    Ok(resized.into_raw())
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| DetectError::capture("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| DetectError::capture("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(DetectError::capture(format!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let offset = (j * w + i) * 3;
            write_rgb(
                &mut rgb[offset..offset + 3],
                pixels[j * w + i],
                pixels[uv_index],
                pixels[uv_index + 1],
            );
        }
    }

    Ok(rgb)
}

/// Packed 4:2:2: `Y0 U Y1 V` covers two horizontal pixels.
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| DetectError::capture("YUYV frame dimensions overflow"))?;
    if width % 2 != 0 || pixels.len() != pixel_count * 2 {
        return Err(DetectError::capture(format!(
            "YUYV frame length mismatch: expected {} for {}x{}, got {}",
            pixel_count * 2,
            width,
            height,
            pixels.len()
        )));
    }

    let mut rgb = vec![0u8; pixel_count * 3];
    for (pair, out) in pixels.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
        write_rgb(&mut out[..3], y0, u, v);
        write_rgb(&mut out[3..], y1, u, v);
    }
    Ok(rgb)
}

fn write_rgb(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
