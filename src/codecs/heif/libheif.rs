//! [`HevcEngine`] backed by the system libheif (`heif` feature).

use super::engine::{Chroma, DecodeTarget, DecodedImage, EncodeJob, HevcEngine, Interleaved};
use super::super::loader::CodecError;
use super::super::params::HeifQuality;
use libheif_rs::{
    Channel, ColorProfileRaw, ColorSpace, CompressionFormat, EncoderQuality, HeifContext,
    Image as HeifImage, ItemId, LibHeif, RgbChroma, color_profile_types,
};
use std::path::Path;

fn decode_error(e: libheif_rs::HeifError) -> CodecError {
    CodecError::Decode(format!("libheif: {e}"))
}

fn encode_error(e: libheif_rs::HeifError) -> CodecError {
    CodecError::Encode(format!("libheif: {e}"))
}

/// libheif with its default HEVC plugins. libheif cannot say how deep the
/// x265 build goes, so the maximum comes from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibheifEngine {
    max_bit_depth: Option<u8>,
}

impl LibheifEngine {
    pub fn new(max_bit_depth: Option<u8>) -> Self {
        Self { max_bit_depth }
    }
}

impl HevcEngine for LibheifEngine {
    fn name(&self) -> &'static str {
        "libheif"
    }

    fn max_encoder_bit_depth(&self) -> Option<u8> {
        self.max_bit_depth
    }

    fn supports_encoder_bit_depth(&self, bits: u8) -> bool {
        matches!(bits, 8 | 10 | 12)
            && LibHeif::new()
                .encoder_for_format(CompressionFormat::Hevc)
                .is_ok()
    }

    fn decode(&self, path: &Path, target: DecodeTarget) -> Result<DecodedImage, CodecError> {
        let lib = LibHeif::new();
        let path_str = path
            .to_str()
            .ok_or_else(|| CodecError::Decode(format!("non UTF-8 path {}", path.display())))?;
        let ctx = HeifContext::read_from_file(path_str).map_err(decode_error)?;
        let primary = ctx.primary_image_handle().map_err(decode_error)?;
        let handle = match target {
            DecodeTarget::Primary => primary,
            DecodeTarget::Thumbnail => {
                let mut ids: Vec<ItemId> = vec![0; primary.number_of_thumbnails()];
                let found = primary.thumbnail_ids(&mut ids);
                let id = ids
                    .into_iter()
                    .take(found)
                    .next()
                    .ok_or_else(|| CodecError::Decode("HEIF has no thumbnail".into()))?;
                primary.thumbnail(id).map_err(decode_error)?
            }
        };

        let has_alpha = handle.has_alpha_channel();
        let wide = handle.luma_bits_per_pixel() > 8;
        let chroma = match (wide, has_alpha) {
            (false, false) => RgbChroma::Rgb,
            (false, true) => RgbChroma::Rgba,
            (true, false) => RgbChroma::HdrRgbBe,
            (true, true) => RgbChroma::HdrRgbaBe,
        };
        let image = lib
            .decode(&handle, ColorSpace::Rgb(chroma), None)
            .map_err(decode_error)?;
        let planes = image.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| CodecError::Decode("libheif returned no interleaved plane".into()))?;
        let (width, height) = (plane.width, plane.height);
        let channels = if has_alpha { 4 } else { 3 };
        let row_samples = width as usize * channels;

        let samples = if wide {
            let mut out = Vec::with_capacity(row_samples * height as usize);
            for row in plane.data.chunks(plane.stride).take(height as usize) {
                out.extend(
                    row[..row_samples * 2]
                        .chunks_exact(2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]])),
                );
            }
            Interleaved::Wide(out)
        } else {
            let mut out = Vec::with_capacity(row_samples * height as usize);
            for row in plane.data.chunks(plane.stride).take(height as usize) {
                out.extend_from_slice(&row[..row_samples]);
            }
            Interleaved::Eight(out)
        };
        Ok(DecodedImage {
            width,
            height,
            bit_depth: plane.bits_per_pixel,
            has_alpha,
            samples,
        })
    }

    fn encode(&self, job: &EncodeJob<'_>) -> Result<Vec<u8>, CodecError> {
        let lib = LibHeif::new();
        let chroma = match job.chroma {
            Chroma::Rgb => RgbChroma::Rgb,
            Chroma::Rgba => RgbChroma::Rgba,
            Chroma::RrggbbBe => RgbChroma::HdrRgbBe,
            Chroma::RrggbbaaBe => RgbChroma::HdrRgbaBe,
        };
        let mut image =
            HeifImage::new(job.width, job.height, ColorSpace::Rgb(chroma)).map_err(encode_error)?;
        if let Some(icc) = job.icc {
            let profile = ColorProfileRaw::new(color_profile_types::PROF, icc.to_vec());
            image.set_color_profile_raw(&profile).map_err(encode_error)?;
        }
        image
            .create_plane(Channel::Interleaved, job.width, job.height, job.bit_depth)
            .map_err(encode_error)?;
        {
            let planes = image.planes_mut();
            let plane = planes
                .interleaved
                .ok_or_else(|| CodecError::Encode("libheif gave no interleaved plane".into()))?;
            let row_samples = job.width as usize * if job.has_alpha() { 4 } else { 3 };
            let stride = plane.stride;
            for (y, src) in job.samples.chunks_exact(row_samples).enumerate() {
                let dst = &mut plane.data[y * stride..];
                if job.bit_depth > 8 {
                    for (i, s) in src.iter().enumerate() {
                        dst[i * 2..i * 2 + 2].copy_from_slice(&s.to_be_bytes());
                    }
                } else {
                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d = s as u8;
                    }
                }
            }
        }

        let mut encoder = lib
            .encoder_for_format(CompressionFormat::Hevc)
            .map_err(encode_error)?;
        let quality = match job.quality {
            HeifQuality::Lossless => EncoderQuality::LossLess,
            HeifQuality::Lossy(q) => EncoderQuality::Lossy(q),
        };
        encoder.set_quality(quality).map_err(encode_error)?;

        let mut ctx = HeifContext::new().map_err(encode_error)?;
        let handle = ctx
            .encode_image(&image, &mut encoder, None)
            .map_err(encode_error)?;
        if let Some(bbox) = job.thumbnail_box {
            ctx.encode_thumbnail(&image, &handle, bbox, &mut encoder, None)
                .map_err(encode_error)?;
        }
        if let Some(exif) = job.exif {
            ctx.add_exif_metadata(&handle, exif).map_err(encode_error)?;
        }
        if let Some(xmp) = job.xmp {
            ctx.add_xmp_metadata(&handle, xmp).map_err(encode_error)?;
        }
        if let Some(iptc) = job.iptc {
            ctx.add_generic_metadata(&handle, iptc, "iptc", None)
                .map_err(encode_error)?;
        }
        ctx.write_to_bytes().map_err(encode_error)
    }
}
