//! # raster-codecs
//!
//! A multi-format raster codec layer. Every format is reached through one
//! contract, [`codecs::ImageLoader`], and decodes into one canonical pixel
//! representation: interleaved BGRA at 8 or 16 bits per channel.
//!
//! # Architecture
//!
//! ```text
//! file ──sniff──▶ adapter ──load──▶ Image { BGRA buffer, attributes, ICC, text }
//! Image ──save──▶ adapter (by target extension) ──▶ sibling temp file ──▶ rename
//! ```
//!
//! Adapters are stateless values. A load returns a fresh [`codecs::Image`] on
//! success and nothing on failure; progress and cancellation flow through an
//! optional [`codecs::LoadObserver`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`codecs`] | The loader contract, pixel model, the PNG/TIFF/HEIF/generic/third-party adapters and the format dispatcher |
//! | [`config`] | `config.toml` loading, validation and merging; save defaults applied to images |
//! | [`batch`] | Parallel `info` / `convert` over many files with progress events |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Buffer Layout
//!
//! Gray, palette, RGB, CMYK and float sources all land in the same BGRA
//! buffer. Consumers handle two cases (8-bit and 16-bit) instead of one per
//! source color model; the original model is kept in the
//! `originalColorModel` attribute.
//!
//! ## Checked Allocation
//!
//! Every pixel buffer goes through [`codecs::allocate_buffer`], which refuses
//! sizes whose `width * height * bytes_per_pixel` overflows or exceeds
//! [`codecs::MAX_BUFFER_BYTES`]. Hostile headers fail with an error instead
//! of aborting the process.
//!
//! ## HEVC Behind a Trait
//!
//! HEIF containers are parsed in pure Rust, so header-only reads need no
//! native code. Pixel decode and encode go through
//! [`codecs::heif::HevcEngine`], implemented over libheif when the `heif`
//! feature is enabled.

pub mod batch;
pub mod codecs;
pub mod config;
pub mod output;

#[cfg(test)]
pub(crate) mod test_helpers;
