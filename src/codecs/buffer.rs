//! The canonical pixel buffer and overflow-safe allocation.
//!
//! Every adapter converges on one layout: interleaved B, G, R, A with 8 or
//! 16 bits per channel, row-major, no padding. Sources without alpha get a
//! fully opaque alpha channel, so a pixel is always four samples.
//! 16-bit samples are held as native `u16` values.

use super::loader::CodecError;

/// Samples per pixel in the canonical buffer.
pub const CHANNELS: usize = 4;

/// Largest buffer, in bytes, any adapter will try to allocate.
///
/// Anything above the 32-bit addressable range is refused up front so that
/// absurd headers fail deterministically instead of depending on the
/// allocator's mood.
pub const MAX_BUFFER_BYTES: u64 = u32::MAX as u64;

/// Byte length of a `width x height` buffer at `bytes_per_pixel`, if it is
/// representable and within `limit`.
pub fn checked_buffer_len(width: u32, height: u32, bytes_per_pixel: u32, limit: u64) -> Option<usize> {
    let len = (width as u64)
        .checked_mul(height as u64)?
        .checked_mul(bytes_per_pixel as u64)?;
    if len > limit || len > isize::MAX as u64 {
        return None;
    }
    usize::try_from(len).ok()
}

/// Allocate a zeroed byte buffer for `width x height` pixels.
///
/// Returns `None` when the size overflows, exceeds [`MAX_BUFFER_BYTES`], or
/// the allocator refuses. Callers treat `None` as a failed load.
pub fn allocate_buffer(width: u32, height: u32, bytes_per_pixel: u32) -> Option<Vec<u8>> {
    allocate_samples::<u8>(width, height, bytes_per_pixel as usize)
}

/// Allocate `width x height x samples_per_pixel` zeroed samples of `T`.
pub fn allocate_samples<T: Copy + Default>(
    width: u32,
    height: u32,
    samples_per_pixel: usize,
) -> Option<Vec<T>> {
    let bytes_per_pixel = u32::try_from(samples_per_pixel.checked_mul(size_of::<T>())?).ok()?;
    let bytes = checked_buffer_len(width, height, bytes_per_pixel, MAX_BUFFER_BYTES)?;
    let count = bytes / size_of::<T>().max(1);
    let mut samples = Vec::new();
    samples.try_reserve_exact(count).ok()?;
    samples.resize(count, T::default());
    Some(samples)
}

/// Interleaved BGRA samples at one of the two canonical depths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Samples {
    Eight(Vec<u8>),
    Sixteen(Vec<u16>),
}

/// An owned canonical pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    samples: Samples,
}

impl PixelBuffer {
    /// Opaque black 8-bit buffer.
    pub fn new_eight(width: u32, height: u32) -> Result<Self, CodecError> {
        let mut data = allocate_samples::<u8>(width, height, CHANNELS)
            .ok_or(CodecError::Allocation {
                width,
                height,
                bytes_per_pixel: 4,
            })?;
        for px in data.chunks_exact_mut(CHANNELS) {
            px[3] = u8::MAX;
        }
        Ok(Self {
            width,
            height,
            samples: Samples::Eight(data),
        })
    }

    /// Opaque black 16-bit buffer.
    pub fn new_sixteen(width: u32, height: u32) -> Result<Self, CodecError> {
        let mut data = allocate_samples::<u16>(width, height, CHANNELS)
            .ok_or(CodecError::Allocation {
                width,
                height,
                bytes_per_pixel: 8,
            })?;
        for px in data.chunks_exact_mut(CHANNELS) {
            px[3] = u16::MAX;
        }
        Ok(Self {
            width,
            height,
            samples: Samples::Sixteen(data),
        })
    }

    pub fn new(width: u32, height: u32, sixteen_bit: bool) -> Result<Self, CodecError> {
        if sixteen_bit {
            Self::new_sixteen(width, height)
        } else {
            Self::new_eight(width, height)
        }
    }

    /// Wrap existing BGRA samples, checking the length invariant.
    pub fn from_samples(width: u32, height: u32, samples: Samples) -> Result<Self, CodecError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(CHANNELS));
        let actual = match &samples {
            Samples::Eight(v) => v.len(),
            Samples::Sixteen(v) => v.len(),
        };
        if expected != Some(actual) {
            return Err(CodecError::Rejected(format!(
                "buffer of {actual} samples does not match {width}x{height} BGRA"
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sixteen_bit(&self) -> bool {
        matches!(self.samples, Samples::Sixteen(_))
    }

    pub fn bits_per_channel(&self) -> u8 {
        if self.sixteen_bit() { 16 } else { 8 }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_channel() as usize / 8) * CHANNELS
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut Samples {
        &mut self.samples
    }

    pub fn into_samples(self) -> Samples {
        self.samples
    }

    pub fn as_eight(&self) -> Option<&[u8]> {
        match &self.samples {
            Samples::Eight(v) => Some(v),
            Samples::Sixteen(_) => None,
        }
    }

    pub fn as_sixteen(&self) -> Option<&[u16]> {
        match &self.samples {
            Samples::Sixteen(v) => Some(v),
            Samples::Eight(_) => None,
        }
    }

    /// One pixel as `[b, g, r, a]` widened to 16 bits.
    pub fn pixel16(&self, x: u32, y: u32) -> Option<[u16; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some(match &self.samples {
            Samples::Eight(v) => [0, 1, 2, 3].map(|c| v[i + c] as u16 * 257),
            Samples::Sixteen(v) => [v[i], v[i + 1], v[i + 2], v[i + 3]],
        })
    }

    /// True when every alpha sample is at its maximum.
    pub fn is_opaque(&self) -> bool {
        match &self.samples {
            Samples::Eight(v) => v.chunks_exact(CHANNELS).all(|px| px[3] == u8::MAX),
            Samples::Sixteen(v) => v.chunks_exact(CHANNELS).all(|px| px[3] == u16::MAX),
        }
    }

    /// Copy converted to 8 bits per channel (high byte of each sample).
    pub fn to_eight(&self) -> PixelBuffer {
        match &self.samples {
            Samples::Eight(_) => self.clone(),
            Samples::Sixteen(v) => PixelBuffer {
                width: self.width,
                height: self.height,
                samples: Samples::Eight(v.iter().map(|&s| (s >> 8) as u8).collect()),
            },
        }
    }

    /// Copy converted to 16 bits per channel (`v * 257`).
    pub fn to_sixteen(&self) -> PixelBuffer {
        match &self.samples {
            Samples::Sixteen(_) => self.clone(),
            Samples::Eight(v) => PixelBuffer {
                width: self.width,
                height: self.height,
                samples: Samples::Sixteen(v.iter().map(|&s| s as u16 * 257).collect()),
            },
        }
    }
}
