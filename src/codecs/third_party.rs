//! Adapter over `zune-image`.
//!
//! Like the generic adapter the library works on whole images, so progress
//! is reported as pseudo-values and cancellation is never polled. Unlike it,
//! 16-bit sources stay 16-bit. Header-only loads go through the format's
//! header reader and fall back to a full decode for formats without one.

use super::atomic::AtomicFile;
use super::buffer::{PixelBuffer, Samples};
use super::image::{ColorModel, Image, keys};
use super::loader::{CodecError, ImageLoader, LoadFlags, loading_failed};
use super::metadata::{self, MetadataBlocks};
use super::observer::{LoadObserver, Progress};
use super::pixels::{bgra_to_rgb, swap_red_blue};
use std::path::Path;
use zune_core::bit_depth::BitDepth;
use zune_core::colorspace::ColorSpace;
use zune_image::codecs::ImageFormat;
use zune_image::image::Image as ZuneImage;
use zune_image::metadata::ImageMetadata;

/// Extensions the library can encode to.
const SAVE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "ppm", "pam", "qoi", "ff", "farbfeld", "jxl", "hdr"];

pub fn supported_output_extensions() -> &'static [&'static str] {
    SAVE_EXTENSIONS
}

fn zune_error(e: impl std::fmt::Display) -> CodecError {
    CodecError::Decode(format!("zune-image: {e}"))
}

fn color_model(colorspace: ColorSpace) -> ColorModel {
    match colorspace {
        ColorSpace::Luma | ColorSpace::LumaA => ColorModel::Grayscale,
        ColorSpace::YCbCr | ColorSpace::YCCK => ColorModel::YCbCr,
        ColorSpace::CMYK => ColorModel::Cmyk,
        _ => ColorModel::Rgb,
    }
}

fn bits(depth: BitDepth) -> u32 {
    match depth {
        BitDepth::Eight => 8,
        BitDepth::Sixteen => 16,
        BitDepth::Float32 => 32,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThirdPartyRasterCodec;

impl ThirdPartyRasterCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for ThirdPartyRasterCodec {
    fn format_name(&self) -> &'static str {
        "ThirdParty"
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, CodecError> {
        load_zune(path, flags, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), CodecError> {
        save_zune(image, path, Progress::new(observer))
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

/// Header fields from the format's own header reader, without touching the
/// pixel payload. `None` when the codec has no such reader.
fn read_header(data: &[u8]) -> Result<Option<ImageMetadata>, CodecError> {
    let (format, data) = ImageFormat::guess_format(data)
        .ok_or_else(|| CodecError::Rejected("format not recognised by zune-image".into()))?;
    let mut decoder = format.get_decoder(data).map_err(zune_error)?;
    decoder.read_headers().map_err(zune_error)
}

/// Image shell for the reported geometry and sample layout.
fn header_image(
    (width, height): (usize, usize),
    colorspace: ColorSpace,
    depth: BitDepth,
) -> Result<Image, CodecError> {
    let (width, height) = (
        u32::try_from(width).map_err(|_| CodecError::Rejected("width out of range".into()))?,
        u32::try_from(height).map_err(|_| CodecError::Rejected("height out of range".into()))?,
    );
    tracing::debug!(width, height, ?colorspace, ?depth, "zune header");
    let sixteen = match depth {
        BitDepth::Eight => false,
        BitDepth::Sixteen => true,
        other => {
            return Err(CodecError::Rejected(format!("unsupported sample depth {other:?}")));
        }
    };
    let mut image = Image::header(width, height, sixteen, colorspace.has_alpha());
    image.set_origin("ThirdParty", color_model(colorspace), bits(depth));
    Ok(image)
}

fn load_zune(path: &Path, flags: LoadFlags, mut progress: Progress<'_>) -> Result<Image, CodecError> {
    if !flags.wants_pixels() {
        let data = std::fs::read(path)?;
        if let Some(header) = read_header(&data)? {
            let mut image =
                header_image(header.get_dimensions(), header.get_colorspace(), header.get_depth())?;
            metadata::attach_to_image(&mut image, path, flags, MetadataBlocks::default())?;
            progress.finish();
            return Ok(image);
        }
        tracing::debug!(path = %path.display(), "no header reader for this format, decoding fully");
    }

    let mut decoded = ZuneImage::open(path).map_err(zune_error)?;
    progress.report(0.5);
    let colorspace = decoded.colorspace();
    let mut image = header_image(decoded.dimensions(), colorspace, decoded.depth())?;
    let (width, height) = (image.width, image.height);

    if flags.wants_pixels() {
        decoded.convert_color(ColorSpace::RGBA).map_err(zune_error)?;
        let missing = || CodecError::Decode("zune-image returned no frame".into());
        let buffer = if image.sixteen_bit {
            let frame = decoded.frames_ref().first().ok_or_else(missing)?;
            let mut samples: Vec<u16> = frame.flatten(ColorSpace::RGBA);
            swap_red_blue(&mut samples);
            PixelBuffer::from_samples(width, height, Samples::Sixteen(samples))?
        } else {
            let mut samples = decoded.flatten_to_u8().into_iter().next().ok_or_else(missing)?;
            swap_red_blue(&mut samples);
            PixelBuffer::from_samples(width, height, Samples::Eight(samples))?
        };
        image.pixels = Some(buffer);
        progress.report(0.9);
    }

    metadata::attach_to_image(&mut image, path, flags, MetadataBlocks::default())?;
    progress.finish();
    Ok(image)
}

fn save_zune(image: &Image, path: &Path, mut progress: Progress<'_>) -> Result<(), CodecError> {
    let pixels = image.require_pixels()?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SAVE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(CodecError::Unsupported(format!(
            "no zune-image encoder for '.{ext}'"
        )));
    }

    if image.attributes.contains(keys::QUALITY) {
        tracing::debug!(ext = %ext, "zune-image saves with default options, quality ignored");
    }

    let alpha = image.has_alpha;
    let colorspace = if alpha { ColorSpace::RGBA } else { ColorSpace::RGB };
    let (w, h) = (pixels.width() as usize, pixels.height() as usize);
    let encodable = match pixels.samples() {
        Samples::Eight(s) => ZuneImage::from_u8(&bgra_to_rgb(s, alpha), w, h, colorspace),
        Samples::Sixteen(s) => ZuneImage::from_u16(&bgra_to_rgb(s, alpha), w, h, colorspace),
    };
    progress.report(0.3);

    let out = AtomicFile::create(path)?;
    encodable
        .save(out.path())
        .map_err(|e| CodecError::Encode(format!("zune-image: {e}")))?;
    progress.report(0.9);
    out.commit()?;
    progress.finish();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{gradient_eight, gradient_sixteen};
    use tempfile::TempDir;

    #[test]
    fn png_round_trip_eight_bit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.png");
        let pixels = gradient_eight(7, 5);
        let mut image = Image::from_pixels(pixels.clone(), true);
        ThirdPartyRasterCodec.save(&mut image, &path, None).unwrap();
        assert_eq!(image.attributes.get_str(keys::SAVED_FORMAT), Some("ThirdParty"));
        let back = ThirdPartyRasterCodec.load(&path, LoadFlags::default(), None).unwrap();
        assert!(!back.sixteen_bit);
        assert_eq!(back.pixels, Some(pixels));
    }

    #[test]
    fn sixteen_bit_png_stays_sixteen_bit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep.png");
        let pixels = gradient_sixteen(4, 3);
        let mut image = Image::from_pixels(pixels.clone(), false);
        ThirdPartyRasterCodec.save(&mut image, &path, None).unwrap();
        let back = ThirdPartyRasterCodec.load(&path, LoadFlags::default(), None).unwrap();
        assert!(back.sixteen_bit);
        assert!(!back.has_alpha);
        assert_eq!(back.attributes.get_int(keys::ORIGINAL_BIT_DEPTH), Some(16));
        assert_eq!(back.pixels, Some(pixels));
    }

    #[test]
    fn header_only_drops_pixels() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("h.qoi");
        let mut image = Image::from_pixels(gradient_eight(9, 4), false);
        ThirdPartyRasterCodec.save(&mut image, &path, None).unwrap();
        let back = ThirdPartyRasterCodec.load(&path, LoadFlags::header_only(), None).unwrap();
        assert!(back.pixels.is_none());
        assert_eq!((back.width, back.height), (9, 4));
        assert_eq!(back.original_color_model(), ColorModel::Rgb);
    }

    #[test]
    fn header_only_skips_the_pixel_payload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cut.qoi");
        let mut image = Image::from_pixels(gradient_eight(64, 32), true);
        ThirdPartyRasterCodec.save(&mut image, &path, None).unwrap();
        // Keep the 14-byte header and a sliver of the encoded pixels.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..20]).unwrap();

        let back = ThirdPartyRasterCodec.load(&path, LoadFlags::header_only(), None).unwrap();
        assert!(back.pixels.is_none());
        assert_eq!((back.width, back.height), (64, 32));
        assert!(back.has_alpha);
        assert_eq!(back.original_color_model(), ColorModel::Rgb);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tga");
        let mut image = Image::from_pixels(gradient_eight(2, 2), false);
        let err = ThirdPartyRasterCodec.save(&mut image, &path, None).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
        assert!(!path.exists());
    }
}
