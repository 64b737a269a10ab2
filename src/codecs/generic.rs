//! Adapter over the `image` crate's decoders and encoders.
//!
//! The library decodes whole images in one call, so progress is reported as
//! fixed pseudo-values around that call and cancellation is never polled.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Header | `ImageReader::into_decoder` → `dimensions`, `color_type` |
//! | ICC profile | `ImageDecoder::icc_profile` |
//! | Decode | `DynamicImage::from_decoder` → RGBA8 |
//! | Encode JPEG | `JpegEncoder::new_with_quality` |
//! | Encode PNG, TIFF, WebP, BMP, GIF | `DynamicImage::write_to` |

use super::atomic::AtomicFile;
use super::buffer::{PixelBuffer, Samples};
use super::image::{ColorModel, ColorProfile, Image, keys};
use super::loader::{CodecError, ImageLoader, LoadFlags, loading_failed};
use super::metadata::{self, MetadataBlocks};
use super::observer::{LoadObserver, Progress};
use super::params::GenericSaveOptions;
use super::pixels::{bgra_to_rgb, swap_red_blue};
use ::image::codecs::jpeg::JpegEncoder;
use ::image::{
    ColorType, DynamicImage, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Rgb, Rgba,
};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions mapped to the formats this build reads or writes.
const CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
    ("bmp", ImageFormat::Bmp),
    ("gif", ImageFormat::Gif),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Extensions with a working decoder compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Output format for a target path, by extension.
pub fn output_format(path: &Path) -> Option<ImageFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    CANDIDATES
        .iter()
        .find(|(e, fmt)| *e == ext && fmt.writing_enabled())
        .map(|(_, fmt)| *fmt)
}

/// Whether the `image` crate recognises this content.
pub fn can_decode(head: &[u8]) -> bool {
    ::image::guess_format(head).is_ok_and(|fmt| fmt.reading_enabled())
}

fn decode_error(e: ::image::ImageError) -> CodecError {
    CodecError::Decode(e.to_string())
}

fn encode_error(e: ::image::ImageError) -> CodecError {
    CodecError::Encode(e.to_string())
}

fn color_model(color: ColorType) -> ColorModel {
    match color {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => ColorModel::Grayscale,
        _ => ColorModel::Rgb,
    }
}

fn bits_per_channel(color: ColorType) -> u32 {
    u32::from(color.bits_per_pixel()) / u32::from(color.channel_count().max(1))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericRasterCodec;

impl GenericRasterCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for GenericRasterCodec {
    fn format_name(&self) -> &'static str {
        "Generic"
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, CodecError> {
        load_generic(path, flags, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), CodecError> {
        save_generic(image, path, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))?;
        image.attributes.set(keys::SAVED_FORMAT, self.format_name());
        Ok(())
    }

    fn has_alpha(&self) -> bool {
        true
    }

    fn sixteen_bit(&self) -> bool {
        false
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

fn load_generic(path: &Path, flags: LoadFlags, mut progress: Progress<'_>) -> Result<Image, CodecError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| CodecError::Rejected("format not recognised".into()))?;
    let mut decoder = reader.into_decoder().map_err(decode_error)?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    tracing::debug!(?format, width, height, ?color, "generic header");

    let mut image = Image::header(width, height, false, color.has_alpha());
    let name = format!("{format:?}").to_uppercase();
    image.set_origin(&name, color_model(color), bits_per_channel(color));

    if flags.contains(LoadFlags::ICC_PROFILE) {
        match decoder.icc_profile() {
            Ok(icc) => image.icc_profile = icc.and_then(ColorProfile::new),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable ICC profile"),
        }
    }
    progress.report(0.1);

    if flags.wants_pixels() {
        let decoded = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        progress.report(0.5);
        let mut samples = decoded.into_rgba8().into_raw();
        swap_red_blue(&mut samples);
        image.pixels = Some(PixelBuffer::from_samples(width, height, Samples::Eight(samples))?);
        progress.report(0.9);
    }

    metadata::attach_to_image(&mut image, path, flags, MetadataBlocks::default())?;
    progress.finish();
    Ok(image)
}

/// Build the encoder-facing image. Alpha is dropped when it carries no
/// information or the target format cannot store it.
fn to_dynamic(pixels: &PixelBuffer, keep_alpha: bool) -> Result<DynamicImage, CodecError> {
    let (w, h) = (pixels.width(), pixels.height());
    let mismatch = || CodecError::Encode("buffer size does not match dimensions".into());
    Ok(match (pixels.samples(), keep_alpha) {
        (Samples::Eight(s), true) => DynamicImage::ImageRgba8(
            ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, bgra_to_rgb(s, true)).ok_or_else(mismatch)?,
        ),
        (Samples::Eight(s), false) => DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, bgra_to_rgb(s, false)).ok_or_else(mismatch)?,
        ),
        (Samples::Sixteen(s), true) => DynamicImage::ImageRgba16(
            ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, bgra_to_rgb(s, true)).ok_or_else(mismatch)?,
        ),
        (Samples::Sixteen(s), false) => DynamicImage::ImageRgb16(
            ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, bgra_to_rgb(s, false)).ok_or_else(mismatch)?,
        ),
    })
}

fn save_generic(image: &Image, path: &Path, mut progress: Progress<'_>) -> Result<(), CodecError> {
    let pixels = image.require_pixels()?;
    let format = output_format(path).ok_or_else(|| {
        CodecError::Unsupported(format!("no encoder for {}", path.display()))
    })?;
    let options = GenericSaveOptions::from_attributes(&image.attributes);
    let keep_alpha = image.has_alpha && !matches!(format, ImageFormat::Jpeg | ImageFormat::Bmp);
    // Only PNG and TIFF keep 16-bit samples.
    let wide = matches!(format, ImageFormat::Png | ImageFormat::Tiff);
    let source = if pixels.sixteen_bit() && !wide {
        pixels.to_eight()
    } else {
        pixels.clone()
    };
    let dynamic = to_dynamic(&source, keep_alpha)?;
    progress.report(0.3);

    let mut out = AtomicFile::create(path)?;
    {
        let mut writer = BufWriter::new(out.file());
        match format {
            ImageFormat::Jpeg => {
                let quality = options.quality.value().clamp(1, 100) as u8;
                dynamic
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
                    .map_err(encode_error)?;
            }
            other => dynamic.write_to(&mut writer, other).map_err(encode_error)?,
        }
        writer.flush()?;
    }
    progress.report(0.9);
    out.commit()?;
    progress.finish();
    Ok(())
}
