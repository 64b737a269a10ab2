//! The HEVC seam.
//!
//! Pixel decode and encode go through [`HevcEngine`]; the container side
//! lives in `boxes`. The encoder capability query is an explicit method on
//! the engine and [`negotiate_bit_depth`] is a pure function over it, so
//! tests inject engines that report whatever depth they need.

use super::super::loader::CodecError;
use super::super::params::HeifQuality;
use std::path::Path;

/// Which image of the file to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeTarget {
    Primary,
    /// The first thumbnail of the primary image.
    Thumbnail,
}

/// Interleaved R,G,B(,A) samples as the engine hands them over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interleaved {
    Eight(Vec<u8>),
    /// Samples occupy the low `bit_depth` bits.
    Wide(Vec<u16>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub has_alpha: bool,
    pub samples: Interleaved,
}

impl DecodedImage {
    pub fn channels(&self) -> usize {
        if self.has_alpha { 4 } else { 3 }
    }
}

/// Interleaved chroma layout handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chroma {
    Rgb,
    Rgba,
    /// 16-bit big-endian containers for depths above 8.
    RrggbbBe,
    RrggbbaaBe,
}

impl Chroma {
    pub fn for_depth(bit_depth: u8, alpha: bool) -> Self {
        match (bit_depth > 8, alpha) {
            (false, false) => Self::Rgb,
            (false, true) => Self::Rgba,
            (true, false) => Self::RrggbbBe,
            (true, true) => Self::RrggbbaaBe,
        }
    }
}

/// Everything the engine needs to write one file.
#[derive(Debug)]
pub struct EncodeJob<'a> {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: Chroma,
    /// R,G,B(,A) samples in the low `bit_depth` bits.
    pub samples: &'a [u16],
    pub quality: HeifQuality,
    pub icc: Option<&'a [u8]>,
    /// Bounding box of a thumbnail to attach, when one is wanted.
    pub thumbnail_box: Option<u32>,
    pub exif: Option<&'a [u8]>,
    pub iptc: Option<&'a [u8]>,
    pub xmp: Option<&'a [u8]>,
}

impl EncodeJob<'_> {
    pub fn has_alpha(&self) -> bool {
        matches!(self.chroma, Chroma::Rgba | Chroma::RrggbbaaBe)
    }
}

pub trait HevcEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Highest bit depth the encoder claims to support, if it can say.
    fn max_encoder_bit_depth(&self) -> Option<u8>;

    /// Whether an encoder for exactly `bits` is available.
    fn supports_encoder_bit_depth(&self, bits: u8) -> bool;

    fn decode(&self, path: &Path, target: DecodeTarget) -> Result<DecodedImage, CodecError>;

    /// Encode to an in-memory HEIF file.
    fn encode(&self, job: &EncodeJob<'_>) -> Result<Vec<u8>, CodecError>;
}

/// Pick the output bit depth: the encoder's reported maximum (capped by
/// `cap`) when usable, else 8 when an 8-bit encoder exists.
pub fn negotiate_bit_depth(engine: &dyn HevcEngine, cap: Option<u8>) -> Result<u8, CodecError> {
    if let Some(max) = engine.max_encoder_bit_depth().filter(|b| (8..=16).contains(b)) {
        let bits = cap.map_or(max, |c| max.min(c.max(8)));
        if engine.supports_encoder_bit_depth(bits) {
            tracing::debug!(engine = engine.name(), bits, "HEVC encoder bit depth");
            return Ok(bits);
        }
    }
    if engine.supports_encoder_bit_depth(8) {
        tracing::debug!(engine = engine.name(), "HEVC encoder falls back to 8 bits");
        return Ok(8);
    }
    tracing::warn!(engine = engine.name(), "cannot get a supported HEVC encoder bit depth");
    Err(CodecError::Unsupported(
        "HEVC encoder reports no usable bit depth".into(),
    ))
}
