//! The loader contract shared by every format adapter.
//!
//! An adapter is a stateless value: [`ImageLoader::load`] returns a fresh
//! [`Image`] on success and nothing on failure, [`ImageLoader::save`] writes
//! an existing image and records the written format on it. Both accept an
//! optional [`LoadObserver`] for progress and cooperative cancellation.

use super::image::Image;
use super::observer::LoadObserver;
use bitflags::bitflags;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of a load or save call.
///
/// `LoadError` and `SaveError` are the same type; which one a function
/// returns is only a naming aid for readers.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Bad signature, malformed header, or a color model / sample format
    /// this adapter cannot turn into pixels.
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Cannot allocate {width}x{height} buffer at {bytes_per_pixel} bytes per pixel")]
    Allocation {
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    },
    #[error("Cancelled by observer")]
    Cancelled,
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type LoadError = CodecError;
pub type SaveError = CodecError;

impl CodecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CodecError::Cancelled)
    }
}

bitflags! {
    /// What a load call should produce.
    ///
    /// Without [`LoadFlags::IMAGE_DATA`] a load is header-only: dimensions,
    /// bit depth, alpha and the original color model are still reported but
    /// no pixel buffer is allocated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadFlags: u32 {
        const ITEM_INFO = 1;
        const METADATA = 2;
        const ICC_PROFILE = 4;
        const IMAGE_DATA = 8;
        const UNIQUE_HASH = 16;
        const IMAGE_HISTORY = 32;
        const PREVIEW = 64;
        const ALL = Self::ITEM_INFO.bits()
            | Self::METADATA.bits()
            | Self::ICC_PROFILE.bits()
            | Self::IMAGE_DATA.bits()
            | Self::UNIQUE_HASH.bits()
            | Self::IMAGE_HISTORY.bits()
            | Self::PREVIEW.bits();
    }
}

impl LoadFlags {
    /// Everything except pixel data and preview substitution.
    pub fn header_only() -> Self {
        LoadFlags::ALL - LoadFlags::IMAGE_DATA - LoadFlags::PREVIEW
    }

    pub fn wants_pixels(self) -> bool {
        self.contains(LoadFlags::IMAGE_DATA)
    }

    /// Embedded text travels with the color profile and metadata requests.
    pub fn wants_text(self) -> bool {
        self.intersects(LoadFlags::METADATA | LoadFlags::ICC_PROFILE)
    }
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags::ALL - LoadFlags::PREVIEW
    }
}

/// The contract every format adapter implements.
///
/// Adapters carry no state between calls, so one instance may serve any
/// number of sequential calls; concurrent decodes use one instance per
/// thread.
pub trait ImageLoader {
    /// Short format name written to the `format` / `savedFormat` attributes.
    fn format_name(&self) -> &'static str;

    /// Decode `path` into a new image.
    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, LoadError>;

    /// Encode `image` to `path`. Sets `savedFormat` on success.
    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), SaveError>;

    /// Whether images produced by this adapter can carry real alpha.
    fn has_alpha(&self) -> bool;

    /// Whether this adapter can produce 16-bit buffers.
    fn sixteen_bit(&self) -> bool;

    /// Read-only adapters reject every `save` with [`CodecError::Unsupported`].
    fn is_read_only(&self) -> bool;
}

/// Single exit point for failed loads and saves.
///
/// Logs the failure once and hands the error back for `?`/`map_err` chains.
pub fn loading_failed(format: &str, path: &Path, err: CodecError) -> CodecError {
    if err.is_cancelled() {
        tracing::debug!(format, path = %path.display(), "cancelled");
    } else {
        tracing::warn!(format, path = %path.display(), error = %err, "codec call failed");
    }
    err
}
