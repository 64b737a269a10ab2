//! Raster codecs over one canonical pixel buffer.
//!
//! | Adapter | Reads | Writes | Backing |
//! |---|---|---|---|
//! | [`PngCodec`] | PNG 1/2/4/8/16-bit, palette, tRNS, Adam7 | PNG 8/16-bit | `png` |
//! | [`TiffCodec`] | TIFF strips, chunky + planar, 8/16/float | TIFF + thumbnail IFD | own IFD walker, `weezl`, `flate2` |
//! | [`HeifCodec`] | HEIF container, HEVC via engine | HEIF via engine | own box parser, [`heif::HevcEngine`] |
//! | [`GenericRasterCodec`] | whatever `image` reads | PNG, JPEG, TIFF, WebP, BMP, GIF | `image` |
//! | [`ThirdPartyRasterCodec`] | whatever `zune-image` reads | PNG, JPEG, PPM, QOI, JXL, ... | `zune-image` |
//!
//! Every adapter decodes into a [`PixelBuffer`] of BGRA samples, 8 or 16
//! bits per channel, and reports progress to an optional [`LoadObserver`]
//! that may cancel the call. [`dispatch`] picks the adapter for a file.
//!
//! The module is split into:
//! - **Contract**: [`loader`], [`observer`], [`image`]
//! - **Pixels**: [`buffer`], [`pixels`], [`calculations`]
//! - **Metadata**: [`metadata`] (EXIF/IPTC/XMP blocks, unique hash)
//! - **Adapters**: [`png`], [`tiff`], [`heif`], [`generic`], [`third_party`]

pub mod atomic;
pub mod buffer;
pub mod calculations;
pub mod dispatch;
pub mod generic;
pub mod heif;
pub mod image;
pub mod loader;
pub mod metadata;
pub mod observer;
pub mod params;
pub mod pixels;
pub mod png;
pub mod third_party;
pub mod tiff;

pub use buffer::{MAX_BUFFER_BYTES, PixelBuffer, Samples, allocate_buffer};
pub use dispatch::{Codec, FormatKind, codec_for_extension, codec_for_path, sniff};
pub use generic::GenericRasterCodec;
pub use heif::HeifCodec;
pub use image::{AttrValue, AttributeMap, ColorModel, ColorProfile, Image, WorkingColorSpace, keys};
pub use loader::{CodecError, ImageLoader, LoadError, LoadFlags, SaveError};
pub use observer::LoadObserver;
pub use png::PngCodec;
pub use third_party::ThirdPartyRasterCodec;
pub use tiff::TiffCodec;
