//! Sample-level conversions into and out of the canonical BGRA layout.

use super::buffer::{CHANNELS, PixelBuffer, Samples};
use super::loader::CodecError;
use ::image::imageops::{self, FilterType};
use ::image::{ImageBuffer, Rgba};

/// Interleaved layout of decoded source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl SourceLayout {
    pub fn channels(self) -> usize {
        match self {
            SourceLayout::Gray => 1,
            SourceLayout::GrayAlpha => 2,
            SourceLayout::Rgb => 3,
            SourceLayout::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, SourceLayout::GrayAlpha | SourceLayout::Rgba)
    }
}

/// Convert one row of source samples into BGRA.
///
/// `opaque` fills the alpha channel for layouts that have none. `dst` must
/// hold `pixels * 4` samples where `pixels = src.len() / layout.channels()`.
pub fn row_to_bgra<T: Copy>(src: &[T], layout: SourceLayout, opaque: T, dst: &mut [T]) {
    let channels = layout.channels();
    for (px, out) in src.chunks_exact(channels).zip(dst.chunks_exact_mut(CHANNELS)) {
        match layout {
            SourceLayout::Gray => {
                out[0] = px[0];
                out[1] = px[0];
                out[2] = px[0];
                out[3] = opaque;
            }
            SourceLayout::GrayAlpha => {
                out[0] = px[0];
                out[1] = px[0];
                out[2] = px[0];
                out[3] = px[1];
            }
            SourceLayout::Rgb => {
                out[0] = px[2];
                out[1] = px[1];
                out[2] = px[0];
                out[3] = opaque;
            }
            SourceLayout::Rgba => {
                out[0] = px[2];
                out[1] = px[1];
                out[2] = px[0];
                out[3] = px[3];
            }
        }
    }
}

/// Swap the first and third sample of every pixel (RGBA ⇄ BGRA).
pub fn swap_red_blue<T>(samples: &mut [T]) {
    for px in samples.chunks_exact_mut(CHANNELS) {
        px.swap(0, 2);
    }
}

/// BGRA → interleaved RGB or RGBA, the layout most encoders want.
pub fn bgra_to_rgb<T: Copy>(src: &[T], keep_alpha: bool) -> Vec<T> {
    let out_channels = if keep_alpha { 4 } else { 3 };
    let mut out = Vec::with_capacity(src.len() / CHANNELS * out_channels);
    for px in src.chunks_exact(CHANNELS) {
        out.push(px[2]);
        out.push(px[1]);
        out.push(px[0]);
        if keep_alpha {
            out.push(px[3]);
        }
    }
    out
}

/// Scale color channels by `alpha / max` in place (associated alpha).
pub fn premultiply_eight(samples: &mut [u8]) {
    for px in samples.chunks_exact_mut(CHANNELS) {
        let a = px[3] as u32;
        for c in &mut px[..3] {
            *c = ((*c as u32 * a + 127) / 255) as u8;
        }
    }
}

pub fn premultiply_sixteen(samples: &mut [u16]) {
    for px in samples.chunks_exact_mut(CHANNELS) {
        let a = px[3] as u64;
        for c in &mut px[..3] {
            *c = ((*c as u64 * a + 32767) / 65535) as u16;
        }
    }
}

/// Apply `v' = v ^ exponent` to the color channels through a lookup table.
pub fn apply_gamma(buffer: &mut PixelBuffer, exponent: f64) {
    match buffer.samples_mut() {
        Samples::Eight(v) => {
            let table: Vec<u8> = (0..=255u32)
                .map(|i| ((i as f64 / 255.0).powf(exponent) * 255.0).round() as u8)
                .collect();
            for px in v.chunks_exact_mut(CHANNELS) {
                for c in &mut px[..3] {
                    *c = table[*c as usize];
                }
            }
        }
        Samples::Sixteen(v) => {
            let table: Vec<u16> = (0..=65535u32)
                .map(|i| ((i as f64 / 65535.0).powf(exponent) * 65535.0).round() as u16)
                .collect();
            for px in v.chunks_exact_mut(CHANNELS) {
                for c in &mut px[..3] {
                    *c = table[*c as usize];
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Re-order pixels so that an image stored with TIFF/EXIF `orientation`
/// (1-8) reads top-left first. Unknown values leave the buffer untouched.
pub fn apply_orientation(buffer: PixelBuffer, orientation: u16) -> Result<PixelBuffer, CodecError> {
    if !(2..=8).contains(&orientation) {
        return Ok(buffer);
    }
    let (w, h) = (buffer.width(), buffer.height());
    let (out_w, out_h) = if orientation >= 5 { (h, w) } else { (w, h) };
    let samples = match buffer.into_samples() {
        Samples::Eight(v) => Samples::Eight(reorient(&v, w as usize, h as usize, orientation)),
        Samples::Sixteen(v) => Samples::Sixteen(reorient(&v, w as usize, h as usize, orientation)),
    };
    PixelBuffer::from_samples(out_w, out_h, samples)
}

fn reorient<T: Copy>(src: &[T], w: usize, h: usize, orientation: u16) -> Vec<T> {
    let (out_w, out_h) = if orientation >= 5 { (h, w) } else { (w, h) };
    let mut out = Vec::with_capacity(src.len());
    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = match orientation {
                2 => (w - 1 - x, y),
                3 => (w - 1 - x, h - 1 - y),
                4 => (x, h - 1 - y),
                5 => (y, x),
                6 => (y, h - 1 - x),
                7 => (w - 1 - y, h - 1 - x),
                8 => (w - 1 - y, x),
                _ => (x, y),
            };
            let i = (sy * w + sx) * CHANNELS;
            out.extend_from_slice(&src[i..i + CHANNELS]);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Resize to exactly `width x height` with a triangle filter.
///
/// Channel order is irrelevant to the filter, so BGRA goes through the
/// `image` crate's RGBA path unchanged.
pub fn resize(buffer: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer, CodecError> {
    let (w, h) = (buffer.width(), buffer.height());
    let layout_error = || CodecError::Encode("pixel buffer does not match its dimensions".into());
    let samples = match buffer.samples() {
        Samples::Eight(v) => {
            let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(w, h, v.clone()).ok_or_else(layout_error)?;
            Samples::Eight(imageops::resize(&img, width, height, FilterType::Triangle).into_raw())
        }
        Samples::Sixteen(v) => {
            let img: ImageBuffer<Rgba<u16>, Vec<u16>> =
                ImageBuffer::from_raw(w, h, v.clone()).ok_or_else(layout_error)?;
            Samples::Sixteen(imageops::resize(&img, width, height, FilterType::Triangle).into_raw())
        }
    };
    PixelBuffer::from_samples(width, height, samples)
}
