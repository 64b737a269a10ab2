//! Typed save options.
//!
//! The attribute map stays loosely typed at the boundary; each adapter turns
//! the keys it understands into one of these structs before encoding.
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`PngSaveOptions`]: Zlib level derived from the 1–99 `quality` hint.
//! - [`TiffSaveOptions`]: Deflate toggle from `compress`.
//! - [`HeifSaveOptions`]: Lossy quality or lossless from `quality`.

use super::calculations::png_compression_level;
use super::image::{AttributeMap, keys};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// `quality` used by the PNG adapter when the attribute is absent.
pub const DEFAULT_PNG_QUALITY: i64 = 50;

/// `quality` used by the HEIF adapter when the attribute is absent.
pub const DEFAULT_HEIF_QUALITY: i64 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngSaveOptions {
    /// zlib level, 0 (fastest) to 9 (smallest).
    pub compression_level: u8,
}

impl PngSaveOptions {
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        let quality = attrs.get_int(keys::QUALITY).unwrap_or(DEFAULT_PNG_QUALITY);
        Self {
            compression_level: png_compression_level(quality),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TiffSaveOptions {
    /// Adobe deflate with horizontal differencing.
    pub deflate: bool,
}

impl TiffSaveOptions {
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        Self {
            deflate: attrs.get_bool(keys::COMPRESS).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeifQuality {
    Lossless,
    Lossy(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeifSaveOptions {
    pub quality: HeifQuality,
}

impl HeifSaveOptions {
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        let quality = attrs.get_int(keys::QUALITY).unwrap_or(DEFAULT_HEIF_QUALITY);
        let quality = if quality <= 0 {
            HeifQuality::Lossless
        } else {
            HeifQuality::Lossy(quality.min(100) as u8)
        };
        Self { quality }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenericSaveOptions {
    pub quality: Quality,
}

impl GenericSaveOptions {
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        let quality = attrs
            .get_int(keys::QUALITY)
            .map(|q| Quality::new(q.clamp(0, 100) as u32))
            .unwrap_or_default();
        Self { quality }
    }
}
