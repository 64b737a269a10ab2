//! HEIF/HEIC adapter.
//!
//! | Module | Role |
//! |--------|------|
//! | `boxes` | ISOBMFF container parsing: geometry, depth, alpha, thumbnails, profiles, EXIF/XMP items |
//! | `engine` | [`HevcEngine`] seam and encoder bit depth negotiation |
//! | `libheif` | libheif-backed engine (`heif` feature) |
//!
//! Header-only loads need nothing beyond the container. Pixel decode and
//! encode require an engine; without one they fail with `Unsupported`.
//! Progress: load rows span 0.4–0.9 after the engine decode, save
//! conversion rows span 0.1–0.9.

pub mod boxes;
pub mod engine;
#[cfg(feature = "heif")]
pub mod libheif;

pub use engine::{
    Chroma, DecodeTarget, DecodedImage, EncodeJob, HevcEngine, Interleaved, negotiate_bit_depth,
};

use super::atomic::AtomicFile;
use super::buffer::{CHANNELS, PixelBuffer, Samples};
use super::calculations::{HEIF_PREVIEW_SIZE, reduce_sample, wants_heif_thumbnail, widen_sample};
use super::image::{ColorModel, ColorProfile, Image, keys};
use super::loader::{CodecError, ImageLoader, LoadFlags, loading_failed};
use super::metadata::{self, MetadataBlocks};
use super::observer::{LoadObserver, Progress};
use super::params::HeifSaveOptions;
use super::pixels::{SourceLayout, row_to_bgra};
use boxes::{ColorInfo, HeifInfo};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct HeifCodec {
    engine: Option<Arc<dyn HevcEngine>>,
    max_bit_depth: Option<u8>,
}

impl std::fmt::Debug for HeifCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeifCodec")
            .field("engine", &self.engine.as_ref().map(|e| e.name()))
            .field("max_bit_depth", &self.max_bit_depth)
            .finish()
    }
}

impl HeifCodec {
    /// Codec with the engine compiled into this build, if any.
    pub fn new() -> Self {
        Self::configured(None)
    }

    /// Compiled-in engine, with `max_bit_depth` capping the encoder depth.
    pub fn configured(max_bit_depth: Option<u8>) -> Self {
        #[cfg(feature = "heif")]
        let engine: Option<Arc<dyn HevcEngine>> =
            Some(Arc::new(libheif::LibheifEngine::new(max_bit_depth)));
        #[cfg(not(feature = "heif"))]
        let engine: Option<Arc<dyn HevcEngine>> = None;
        Self {
            engine,
            max_bit_depth,
        }
    }

    /// Container-only codec: header reads work, pixel access does not.
    pub fn without_engine() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: Arc<dyn HevcEngine>) -> Self {
        Self {
            engine: Some(engine),
            max_bit_depth: None,
        }
    }

    /// Cap the encoder bit depth below whatever the engine reports.
    pub fn with_max_bit_depth(mut self, bits: Option<u8>) -> Self {
        self.max_bit_depth = bits;
        self
    }

    fn engine(&self) -> Result<&dyn HevcEngine, CodecError> {
        self.engine.as_deref().ok_or_else(|| {
            CodecError::Unsupported(
                "no HEVC engine in this build (enable the `heif` feature)".into(),
            )
        })
    }
}

impl ImageLoader for HeifCodec {
    fn format_name(&self) -> &'static str {
        "HEIF"
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, CodecError> {
        self.load_heif(path, flags, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), CodecError> {
        self.save_heif(image, path, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))?;
        image.attributes.set(keys::SAVED_FORMAT, self.format_name());
        Ok(())
    }

    fn has_alpha(&self) -> bool {
        true
    }

    fn sixteen_bit(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

fn collect_metadata(info: &HeifInfo) -> MetadataBlocks {
    let mut blocks = MetadataBlocks::default();
    if let Some(exif) = &info.exif {
        blocks.set_exif(exif);
    }
    if let Some(xmp) = &info.xmp {
        blocks.set_xmp(xmp);
    }
    blocks
}

/// Canonical buffer from the engine's interleaved output. Samples above 8
/// bits are shifted up to the full 16-bit range.
fn decoded_to_buffer(
    decoded: &DecodedImage,
    progress: &mut Progress<'_>,
) -> Result<PixelBuffer, CodecError> {
    let layout = if decoded.has_alpha {
        SourceLayout::Rgba
    } else {
        SourceLayout::Rgb
    };
    let row_len = decoded.width as usize * decoded.channels();
    let out_len = decoded.width as usize * CHANNELS;
    let rows = decoded.height as usize;
    let mut checkpoints = progress.slice(rows, 0.4, 0.9);

    let truncated = || CodecError::Decode("HEVC engine returned too few samples".into());
    match &decoded.samples {
        Interleaved::Eight(src) => {
            let mut buffer = PixelBuffer::new_eight(decoded.width, decoded.height)?;
            let Samples::Eight(dst) = buffer.samples_mut() else {
                return Err(CodecError::Decode("8-bit buffer expected".into()));
            };
            for y in 0..rows {
                progress.tick(&mut checkpoints, y)?;
                let row = src.get(y * row_len..(y + 1) * row_len).ok_or_else(truncated)?;
                row_to_bgra(row, layout, u8::MAX, &mut dst[y * out_len..(y + 1) * out_len]);
            }
            Ok(buffer)
        }
        Interleaved::Wide(src) => {
            let bits = decoded.bit_depth.clamp(9, 16);
            let mut buffer = PixelBuffer::new_sixteen(decoded.width, decoded.height)?;
            let Samples::Sixteen(dst) = buffer.samples_mut() else {
                return Err(CodecError::Decode("16-bit buffer expected".into()));
            };
            // Synthesized alpha is already full range.
            let shifted = if decoded.has_alpha { CHANNELS } else { 3 };
            for y in 0..rows {
                progress.tick(&mut checkpoints, y)?;
                let row = src.get(y * row_len..(y + 1) * row_len).ok_or_else(truncated)?;
                let out = &mut dst[y * out_len..(y + 1) * out_len];
                row_to_bgra(row, layout, u16::MAX, out);
                for px in out.chunks_exact_mut(CHANNELS) {
                    for s in &mut px[..shifted] {
                        *s = widen_sample(*s, bits);
                    }
                }
            }
            Ok(buffer)
        }
    }
}

fn push_rgb<T: Copy + Into<u16>>(
    row: &[T],
    alpha: bool,
    convert: impl Fn(u16) -> u16,
    out: &mut Vec<u16>,
) {
    for p in row.chunks_exact(CHANNELS) {
        out.extend([convert(p[2].into()), convert(p[1].into()), convert(p[0].into())]);
        if alpha {
            out.push(convert(p[3].into()));
        }
    }
}

/// Interleaved R,G,B(,A) samples at `bits` from the canonical buffer:
/// 16-bit sources shift down, 8-bit sources shift up for deeper encoders.
fn buffer_to_interleaved(
    pixels: &PixelBuffer,
    bits: u8,
    alpha: bool,
    progress: &mut Progress<'_>,
) -> Result<Vec<u16>, CodecError> {
    let channels = if alpha { 4 } else { 3 };
    let width = pixels.width() as usize;
    let rows = pixels.height() as usize;
    let mut out = Vec::with_capacity(width * rows * channels);
    let mut checkpoints = progress.slice(rows, 0.1, 0.9);

    let sixteen = pixels.sixteen_bit();
    let convert = |v: u16| {
        if sixteen {
            reduce_sample(v, bits)
        } else if bits > 8 {
            v << (bits - 8)
        } else {
            v
        }
    };

    let row_len = width * CHANNELS;
    for y in 0..rows {
        progress.tick(&mut checkpoints, y)?;
        let range = y * row_len..(y + 1) * row_len;
        match pixels.samples() {
            Samples::Eight(s) => push_rgb(&s[range], alpha, convert, &mut out),
            Samples::Sixteen(s) => push_rgb(&s[range], alpha, convert, &mut out),
        }
    }
    Ok(out)
}

impl HeifCodec {
    fn load_heif(&self, path: &Path, flags: LoadFlags, mut progress: Progress<'_>) -> Result<Image, CodecError> {
        let data = std::fs::read(path)?;
        let info = boxes::parse(&data)?;
        let use_thumbnail = flags.contains(LoadFlags::PREVIEW) && !info.thumbnails.is_empty();
        let item = if use_thumbnail {
            &info.thumbnails[0]
        } else {
            &info.primary
        };
        tracing::debug!(
            brand = %String::from_utf8_lossy(&info.brand),
            width = info.primary.width,
            height = info.primary.height,
            bits = info.primary.bit_depth(),
            alpha = info.primary.has_alpha,
            thumbnails = info.thumbnails.len(),
            use_thumbnail,
            "HEIF header"
        );

        let (width, height) = item.display_size();
        let mut image = Image::header(width, height, item.bit_depth() > 8, info.primary.has_alpha);
        let model = match info.primary.chroma_format {
            Some(0) => ColorModel::Grayscale,
            _ => ColorModel::Rgb,
        };
        image.set_origin("HEIF", model, u32::from(info.primary.bit_depth()));
        image
            .attributes
            .set(keys::ORIGINAL_SIZE, info.primary.display_size());

        if flags.contains(LoadFlags::ICC_PROFILE) {
            if let Some(ColorInfo::Icc(icc)) = &info.color {
                image.icc_profile = ColorProfile::new(icc.clone());
            }
        }

        if flags.wants_pixels() {
            let engine = self.engine()?;
            progress.checkpoint(0.1)?;
            let target = if use_thumbnail {
                DecodeTarget::Thumbnail
            } else {
                DecodeTarget::Primary
            };
            let decoded = engine.decode(path, target)?;
            progress.checkpoint(0.4)?;
            let buffer = decoded_to_buffer(&decoded, &mut progress)?;
            image.width = buffer.width();
            image.height = buffer.height();
            image.sixteen_bit = buffer.sixteen_bit();
            image.has_alpha = decoded.has_alpha;
            image.pixels = Some(buffer);
            progress.report(0.9);
        }

        metadata::attach_to_image(&mut image, path, flags, collect_metadata(&info))?;
        progress.finish();
        Ok(image)
    }

    fn save_heif(&self, image: &Image, path: &Path, mut progress: Progress<'_>) -> Result<(), CodecError> {
        let pixels = image.require_pixels()?;
        let engine = self.engine()?;
        let options = HeifSaveOptions::from_attributes(&image.attributes);
        let bits = negotiate_bit_depth(engine, self.max_bit_depth)?;
        let chroma = Chroma::for_depth(bits, image.has_alpha);
        progress.report(0.05);

        let samples = buffer_to_interleaved(pixels, bits, image.has_alpha, &mut progress)?;
        let (width, height) = (pixels.width(), pixels.height());
        let thumbnail_box = wants_heif_thumbnail(width, height).then_some(HEIF_PREVIEW_SIZE);
        tracing::debug!(
            width,
            height,
            bits,
            ?chroma,
            quality = ?options.quality,
            ?thumbnail_box,
            "HEIF encode"
        );
        let job = EncodeJob {
            width,
            height,
            bit_depth: bits,
            chroma,
            samples: &samples,
            quality: options.quality,
            icc: image.icc_profile.as_ref().map(ColorProfile::data),
            thumbnail_box,
            exif: image.metadata.exif.as_deref(),
            iptc: image.metadata.iptc.as_deref(),
            xmp: image.metadata.xmp.as_deref(),
        };
        let bytes = engine.encode(&job)?;
        progress.checkpoint(0.95)?;

        let mut out = AtomicFile::create(path)?;
        out.file().write_all(&bytes)?;
        out.commit()?;
        progress.finish();
        Ok(())
    }
}
