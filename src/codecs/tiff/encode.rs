//! TIFF writer: RGB(A) strips at the buffer's depth, associated alpha,
//! optional Adobe deflate with horizontal differencing, and a second
//! directory carrying an 8-bit RGB thumbnail.

use super::super::buffer::{CHANNELS, PixelBuffer, Samples};
use super::super::calculations::{TIFF_THUMBNAIL_BOX, fit_within};
use super::super::image::Image;
use super::super::loader::CodecError;
use super::super::metadata::{MetadataSource, iptc_as_photoshop_resource};
use super::super::observer::Progress;
use super::super::pixels::{premultiply_eight, premultiply_sixteen, resize};
use super::ifd::{IfdBuilder, TiffBuilder, TiffFile, copy_sub_directories, tag};
use exif::Tag;
use flate2::Compression as ZlibLevel;
use flate2::write::ZlibEncoder;
use std::io::Write;

/// Target uncompressed strip size.
const STRIP_BYTES: usize = 64 * 1024;

/// How channels are laid out in the written strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanarConfig {
    #[default]
    Contiguous,
    Separate,
}

/// Descriptive ASCII tags and the EXIF tags they mirror.
pub(super) const TEXT_TAGS: [(u16, &str, Option<Tag>); 7] = [
    (tag::DOCUMENT_NAME, "DocumentName", None),
    (tag::IMAGE_DESCRIPTION, "ImageDescription", Some(Tag::ImageDescription)),
    (tag::MAKE, "Make", Some(Tag::Make)),
    (tag::MODEL, "Model", Some(Tag::Model)),
    (tag::DATE_TIME, "DateTime", Some(Tag::DateTime)),
    (tag::ARTIST, "Artist", Some(Tag::Artist)),
    (tag::COPYRIGHT, "Copyright", Some(Tag::Copyright)),
];

/// Geometry and encoding choices for one written image.
struct Plan {
    width: usize,
    height: usize,
    channels: usize,
    sixteen: bool,
    planar: PlanarConfig,
    deflate: bool,
    rows_per_strip: usize,
}

impl Plan {
    fn row_samples(&self) -> usize {
        match self.planar {
            PlanarConfig::Contiguous => self.width * self.channels,
            PlanarConfig::Separate => self.width,
        }
    }

    fn bytes_per_sample(&self) -> usize {
        if self.sixteen { 2 } else { 1 }
    }
}

/// Canonical BGRA samples for one output row, as RGB(A) in the requested
/// planar layout. `plane` is ignored for contiguous output.
fn row_samples(plan: &Plan, src: &[u16], plane: usize, out: &mut Vec<u16>) {
    const RGBA: [usize; 4] = [2, 1, 0, 3];
    out.clear();
    for px in src.chunks_exact(CHANNELS) {
        match plan.planar {
            PlanarConfig::Contiguous => {
                out.extend(RGBA[..plan.channels].iter().map(|&c| px[c]));
            }
            PlanarConfig::Separate => out.push(px[RGBA[plane]]),
        }
    }
}

/// Horizontal differencing in place, last sample first.
fn apply_predictor(samples: &mut [u16], stride: usize) {
    for i in (stride..samples.len()).rev() {
        samples[i] = samples[i].wrapping_sub(samples[i - stride]);
    }
}

fn predictor_eight(samples: &mut [u16], stride: usize) {
    for i in (stride..samples.len()).rev() {
        samples[i] = (samples[i] as u8).wrapping_sub(samples[i - stride] as u8) as u16;
    }
}

fn encode_strip(plan: &Plan, samples: &[u16]) -> Result<Vec<u8>, CodecError> {
    let mut raw = Vec::with_capacity(samples.len() * plan.bytes_per_sample());
    if plan.sixteen {
        raw.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
    } else {
        raw.extend(samples.iter().map(|&s| s as u8));
    }
    if !plan.deflate {
        return Ok(raw);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Working copy of the pixels: premultiplied when alpha is kept.
fn prepared_samples(pixels: &PixelBuffer, keep_alpha: bool) -> Vec<u16> {
    match pixels.samples() {
        Samples::Eight(v) => {
            let mut v = v.clone();
            if keep_alpha {
                premultiply_eight(&mut v);
            }
            v.into_iter().map(u16::from).collect()
        }
        Samples::Sixteen(v) => {
            let mut v = v.clone();
            if keep_alpha {
                premultiply_sixteen(&mut v);
            }
            v
        }
    }
}

/// Write the strips for one image and fill in the layout tags of `ifd`.
fn write_strips(
    out: &mut TiffBuilder,
    ifd: &mut IfdBuilder,
    plan: &Plan,
    samples: &[u16],
    mut progress: Option<&mut Progress<'_>>,
) -> Result<(), CodecError> {
    let planes = match plan.planar {
        PlanarConfig::Contiguous => 1,
        PlanarConfig::Separate => plan.channels,
    };
    let bands = plan.height.div_ceil(plan.rows_per_strip);
    let total = planes * bands;
    let mut checkpoints = progress.as_deref().map(|p| p.slice(total, 0.1, 0.9));
    let stride = match plan.planar {
        PlanarConfig::Contiguous => plan.channels,
        PlanarConfig::Separate => 1,
    };
    let src_row = plan.width * CHANNELS;

    let mut offsets = Vec::with_capacity(total);
    let mut counts = Vec::with_capacity(total);
    let mut row = Vec::with_capacity(plan.row_samples());
    let mut strip = Vec::new();
    for index in 0..total {
        if let (Some(p), Some(c)) = (progress.as_deref_mut(), checkpoints.as_mut()) {
            p.tick(c, index)?;
        }
        let (plane, band) = (index / bands, index % bands);
        let first = band * plan.rows_per_strip;
        let last = (first + plan.rows_per_strip).min(plan.height);
        strip.clear();
        for y in first..last {
            row_samples(plan, &samples[y * src_row..(y + 1) * src_row], plane, &mut row);
            if plan.deflate {
                if plan.sixteen {
                    apply_predictor(&mut row, stride);
                } else {
                    predictor_eight(&mut row, stride);
                }
            }
            strip.extend_from_slice(&row);
        }
        let bytes = encode_strip(plan, &strip)?;
        counts.push(bytes.len() as u32);
        offsets.push(out.append(&bytes)?);
    }

    let bits = if plan.sixteen { 16 } else { 8 };
    ifd.long(tag::IMAGE_WIDTH, &[plan.width as u32])
        .long(tag::IMAGE_LENGTH, &[plan.height as u32])
        .short(tag::BITS_PER_SAMPLE, &vec![bits; plan.channels])
        .short(tag::COMPRESSION, &[if plan.deflate { 8 } else { 1 }])
        .short(tag::PHOTOMETRIC, &[2])
        .long(tag::STRIP_OFFSETS, &offsets)
        .short(tag::SAMPLES_PER_PIXEL, &[plan.channels as u16])
        .long(tag::ROWS_PER_STRIP, &[plan.rows_per_strip as u32])
        .long(tag::STRIP_BYTE_COUNTS, &counts)
        .short(
            tag::PLANAR_CONFIG,
            &[match plan.planar {
                PlanarConfig::Contiguous => 1,
                PlanarConfig::Separate => 2,
            }],
        )
        .short(tag::SAMPLE_FORMAT, &vec![1; plan.channels]);
    if plan.deflate {
        ifd.short(tag::PREDICTOR, &[2]);
    }
    if plan.channels == 4 {
        ifd.short(tag::EXTRA_SAMPLES, &[1]);
    }
    Ok(())
}

fn rows_per_strip(row_bytes: usize, height: usize) -> usize {
    (STRIP_BYTES / row_bytes.max(1)).clamp(1, height.max(1))
}

/// Text tags from EXIF first, then from the embedded text map.
fn descriptive_tags(image: &Image, ifd: &mut IfdBuilder) {
    for (code, name, exif_tag) in TEXT_TAGS {
        let value = exif_tag
            .and_then(|t| image.metadata.exif_tag_string(t))
            .or_else(|| image.embedded_text.get(name).cloned());
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            ifd.ascii(code, &value);
        }
    }
}

/// Carry the Exif and GPS directories of the stored EXIF block over to `main`.
fn exif_directories(image: &Image, out: &mut TiffBuilder, main: &mut IfdBuilder) -> Result<(), CodecError> {
    let Some(exif) = image.metadata.exif.as_deref() else {
        return Ok(());
    };
    match TiffFile::parse(exif) {
        Ok(file) => {
            copy_sub_directories(&file, out, main)?;
        }
        Err(e) => tracing::warn!(error = %e, "stored EXIF is unreadable, sub-directories dropped"),
    }
    Ok(())
}

/// Encode `image` into an in-memory TIFF.
pub fn encode(
    image: &Image,
    planar: PlanarConfig,
    deflate: bool,
    progress: &mut Progress<'_>,
) -> Result<Vec<u8>, CodecError> {
    let pixels = image.require_pixels()?;
    let (width, height) = (pixels.width() as usize, pixels.height() as usize);
    let channels = if image.has_alpha { 4 } else { 3 };
    let sixteen = pixels.sixteen_bit();
    let bytes = if sixteen { 2 } else { 1 };
    let row_bytes = match planar {
        PlanarConfig::Contiguous => width * channels * bytes,
        PlanarConfig::Separate => width * bytes,
    };
    let plan = Plan {
        width,
        height,
        channels,
        sixteen,
        planar,
        deflate,
        rows_per_strip: rows_per_strip(row_bytes, height),
    };
    tracing::debug!(width, height, channels, sixteen, ?planar, deflate, "writing TIFF");

    let samples = prepared_samples(pixels, image.has_alpha);
    let mut out = TiffBuilder::new();
    let mut main = IfdBuilder::new();
    main.long(tag::NEW_SUBFILE_TYPE, &[0])
        .short(tag::ORIENTATION, &[1])
        .rational(tag::X_RESOLUTION, 72, 1)
        .rational(tag::Y_RESOLUTION, 72, 1)
        .short(tag::RESOLUTION_UNIT, &[2])
        .ascii(
            tag::SOFTWARE,
            &format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        );
    write_strips(&mut out, &mut main, &plan, &samples, Some(progress))?;
    descriptive_tags(image, &mut main);
    exif_directories(image, &mut out, &mut main)?;
    if let Some(xmp) = &image.metadata.xmp {
        main.byte(tag::XMP, xmp);
    }
    if let Some(iptc) = &image.metadata.iptc {
        main.undefined(tag::IPTC, iptc);
        main.undefined(tag::PHOTOSHOP, &iptc_as_photoshop_resource(iptc));
    }
    if let Some(icc) = &image.icc_profile {
        main.undefined(tag::ICC_PROFILE, icc.data());
    }
    out.push_ifd(&main)?;

    let thumb = thumbnail(pixels)?;
    let mut second = IfdBuilder::new();
    second.long(tag::NEW_SUBFILE_TYPE, &[1]);
    let thumb_plan = Plan {
        width: thumb.width() as usize,
        height: thumb.height() as usize,
        channels: 3,
        sixteen: false,
        planar: PlanarConfig::Contiguous,
        deflate,
        rows_per_strip: thumb.height() as usize,
    };
    let thumb_samples = prepared_samples(&thumb, false);
    write_strips(&mut out, &mut second, &thumb_plan, &thumb_samples, None)?;
    out.push_ifd(&second)?;
    Ok(out.finish())
}

fn thumbnail(pixels: &PixelBuffer) -> Result<PixelBuffer, CodecError> {
    let (w, h) = fit_within((pixels.width(), pixels.height()), TIFF_THUMBNAIL_BOX);
    let small = if (w, h) == (pixels.width(), pixels.height()) {
        pixels.clone()
    } else {
        resize(pixels, w, h)?
    };
    Ok(small.to_eight())
}
