//! Shared test utilities for the codec test suite.
//!
//! Provides observers that record or cancel, synthetic pixel buffers,
//! hand-built PNG and TIFF fixtures, and a recording HEVC engine.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let path = tmp.path().join("rgb.png");
//! write_png_fixture(&path, 4, 4, png::ColorType::Rgb, png::BitDepth::Eight, false);
//!
//! let mut observer = RecordingObserver::default();
//! PngCodec.load(&path, LoadFlags::default(), Some(&mut observer)).unwrap();
//! assert_eq!(observer.values.last().copied(), Some(1.0));
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::codecs::buffer::{PixelBuffer, Samples};
use crate::codecs::heif::boxes::tests::sample_file;
use crate::codecs::heif::{Chroma, DecodeTarget, DecodedImage, EncodeJob, HevcEngine};
use crate::codecs::loader::CodecError;
use crate::codecs::observer::LoadObserver;
use crate::codecs::params::HeifQuality;
use crate::codecs::tiff::ifd::{IfdBuilder, TiffBuilder, tag};

// =========================================================================
// Observers
// =========================================================================

/// Records every progress value and counts polls. Never cancels.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub values: Vec<f32>,
    pub polls: usize,
    pub granularity: Option<f32>,
}

impl LoadObserver for RecordingObserver {
    fn progress(&mut self, value: f32) {
        self.values.push(value);
    }

    fn continue_query(&mut self) -> bool {
        self.polls += 1;
        true
    }

    fn granularity(&self) -> f32 {
        self.granularity.unwrap_or(1.0)
    }
}

/// Allows `allowed` polls, then answers `false`.
#[derive(Debug)]
pub struct CancelAfter {
    allowed: usize,
    pub polls: usize,
}

impl CancelAfter {
    pub fn new(allowed: usize) -> Self {
        Self { allowed, polls: 0 }
    }
}

impl LoadObserver for CancelAfter {
    fn progress(&mut self, _value: f32) {}

    fn continue_query(&mut self) -> bool {
        self.polls += 1;
        self.polls <= self.allowed
    }
}

// =========================================================================
// Synthetic buffers
// =========================================================================

/// Opaque 8-bit BGRA gradient: b = x, g = y, r = x + y (all mod 256).
pub fn gradient_eight(width: u32, height: u32) -> PixelBuffer {
    let mut samples = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            samples.extend([x as u8, y as u8, (x + y) as u8, 255]);
        }
    }
    PixelBuffer::from_samples(width, height, Samples::Eight(samples)).unwrap()
}

/// Opaque 16-bit BGRA gradient with values spread over the full range.
pub fn gradient_sixteen(width: u32, height: u32) -> PixelBuffer {
    let mut samples = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            samples.extend([
                (x * 300 + 7) as u16,
                (y * 257) as u16,
                (x * y) as u16,
                u16::MAX,
            ]);
        }
    }
    PixelBuffer::from_samples(width, height, Samples::Sixteen(samples)).unwrap()
}

// =========================================================================
// PNG fixtures
// =========================================================================

/// Adam7 pass origins and steps: (x0, y0, dx, dy).
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Samples of fixture pixel (x, y), big-endian for 16-bit.
///
/// 8-bit: r = x*40, g = y*40, b = 200, a = 255 - x, gray = x*40 + y.
/// 16-bit: r = x*1000+1, g = y*1000+2, b = 0x1234, a = 0xABCD, gray = x*1000+y.
fn fixture_pixel(x: u32, y: u32, color: png::ColorType, depth: png::BitDepth) -> Vec<u8> {
    let sixteen = depth == png::BitDepth::Sixteen;
    let (r, g, b, a, gray) = if sixteen {
        (x * 1000 + 1, y * 1000 + 2, 0x1234, 0xABCD, x * 1000 + y)
    } else {
        ((x * 40) % 256, (y * 40) % 256, 200, 255 - x % 256, (x * 40 + y) % 256)
    };
    let channels: Vec<u32> = match color {
        png::ColorType::Grayscale => vec![gray],
        png::ColorType::GrayscaleAlpha => vec![gray, a],
        png::ColorType::Rgba => vec![r, g, b, a],
        _ => vec![r, g, b],
    };
    channels
        .into_iter()
        .flat_map(|v| {
            if sixteen {
                (v as u16).to_be_bytes().to_vec()
            } else {
                vec![v as u8]
            }
        })
        .collect()
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    let mut crc = flate2::Crc::new();
    crc.update(kind);
    crc.update(body);
    out.extend_from_slice(&crc.sum().to_be_bytes());
}

/// Write a PNG built byte by byte, optionally Adam7 interlaced. Every
/// scanline uses filter type 0.
pub fn write_png_fixture(
    path: &Path,
    width: u32,
    height: u32,
    color: png::ColorType,
    depth: png::BitDepth,
    interlaced: bool,
) {
    let mut raw = Vec::new();
    let passes: Vec<(u32, u32, u32, u32)> = if interlaced {
        ADAM7.to_vec()
    } else {
        vec![(0, 0, 1, 1)]
    };
    for (x0, y0, dx, dy) in passes {
        if x0 >= width || y0 >= height {
            continue;
        }
        for y in (y0..height).step_by(dy as usize) {
            raw.push(0);
            for x in (x0..width).step_by(dx as usize) {
                raw.extend(fixture_pixel(x, y, color, depth));
            }
        }
    }
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&raw).unwrap();
    let idat = encoder.finish().unwrap();

    let mut ihdr = width.to_be_bytes().to_vec();
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend([depth as u8, color as u8, 0, 0, u8::from(interlaced)]);

    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();
    write_chunk(&mut out, b"IHDR", &ihdr);
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);
    std::fs::write(path, out).unwrap();
}

// =========================================================================
// TIFF fixtures
// =========================================================================

/// Little-endian TIFF assembled from explicit strips, stored raw or
/// deflated.
#[derive(Debug, Clone)]
pub struct TiffFixture {
    width: u32,
    height: u32,
    bits: u16,
    samples_per_pixel: u16,
    photometric: u16,
    sample_format: u16,
    separate_planes: bool,
    rows_per_strip: u32,
    strips: Vec<Vec<u8>>,
    orientation: Option<u16>,
    deflate: bool,
    predictor: Option<u16>,
    exif_date: Option<String>,
}

impl TiffFixture {
    /// Min-is-black 16-bit gray, one strip. Sample (x, y) = x * 1000 + y.
    pub fn gray16(width: u32, height: u32) -> Self {
        let mut strip = Vec::new();
        for y in 0..height {
            for x in 0..width {
                strip.extend_from_slice(&((x * 1000 + y) as u16).to_le_bytes());
            }
        }
        Self {
            width,
            height,
            bits: 16,
            samples_per_pixel: 1,
            photometric: 1,
            sample_format: 1,
            separate_planes: false,
            rows_per_strip: height,
            strips: vec![strip],
            orientation: None,
            deflate: false,
            predictor: None,
            exif_date: None,
        }
    }

    /// One row of 32-bit float RGB pixels.
    pub fn float_rgb(pixels: &[[f32; 3]]) -> Self {
        let strip = pixels
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        Self {
            width: pixels.len() as u32,
            height: 1,
            bits: 32,
            samples_per_pixel: 3,
            photometric: 2,
            sample_format: 3,
            separate_planes: false,
            rows_per_strip: 1,
            strips: vec![strip],
            orientation: None,
            deflate: false,
            predictor: None,
            exif_date: None,
        }
    }

    /// 8-bit RGB stored as separate planes: all red strips, then green,
    /// then blue. Red = x * 10 + y, green = 100 + x, blue = 200 + y.
    pub fn planar_rgb8(width: u32, height: u32, rows_per_strip: u32) -> Self {
        let plane_value = |plane: u32, x: u32, y: u32| match plane {
            0 => (x * 10 + y) as u8,
            1 => (100 + x) as u8,
            _ => (200 + y) as u8,
        };
        let mut strips = Vec::new();
        for plane in 0..3 {
            for first in (0..height).step_by(rows_per_strip as usize) {
                let mut strip = Vec::new();
                for y in first..(first + rows_per_strip).min(height) {
                    strip.extend((0..width).map(|x| plane_value(plane, x, y)));
                }
                strips.push(strip);
            }
        }
        Self {
            width,
            height,
            bits: 8,
            samples_per_pixel: 3,
            photometric: 2,
            sample_format: 1,
            separate_planes: true,
            rows_per_strip,
            strips,
            orientation: None,
            deflate: false,
            predictor: None,
            exif_date: None,
        }
    }

    /// Black 16-bit RGB in a single deflated strip.
    pub fn rgb16_deflate(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: 16,
            samples_per_pixel: 3,
            photometric: 2,
            sample_format: 1,
            separate_planes: false,
            rows_per_strip: height,
            strips: vec![vec![0; width as usize * height as usize * 6]],
            orientation: None,
            deflate: true,
            predictor: None,
            exif_date: None,
        }
    }

    /// Override the declared samples per pixel without touching the strips.
    pub fn samples_per_pixel(mut self, samples: u16) -> Self {
        self.samples_per_pixel = samples;
        self
    }

    pub fn predictor(mut self, predictor: u16) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Add an Exif sub-directory carrying DateTimeOriginal.
    pub fn exif_date(mut self, date: &str) -> Self {
        self.exif_date = Some(date.to_string());
        self
    }

    pub fn drop_last_strip(mut self) -> Self {
        self.strips.pop();
        self
    }

    pub fn orientation(mut self, orientation: u16) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn write(&self, path: &Path) {
        let mut tiff = TiffBuilder::new();
        let strips: Vec<Vec<u8>> = if self.deflate {
            self.strips
                .iter()
                .map(|strip| {
                    let mut encoder =
                        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                    encoder.write_all(strip).unwrap();
                    encoder.finish().unwrap()
                })
                .collect()
        } else {
            self.strips.clone()
        };
        let mut offsets = Vec::new();
        for strip in &strips {
            offsets.push(tiff.append(strip).unwrap());
        }
        let counts: Vec<u32> = strips.iter().map(|s| s.len() as u32).collect();
        let spp = self.samples_per_pixel as usize;

        let mut ifd = IfdBuilder::new();
        ifd.long(tag::IMAGE_WIDTH, &[self.width])
            .long(tag::IMAGE_LENGTH, &[self.height])
            .short(tag::BITS_PER_SAMPLE, &vec![self.bits; spp])
            .short(tag::COMPRESSION, &[if self.deflate { 8 } else { 1 }])
            .short(tag::PHOTOMETRIC, &[self.photometric])
            .long(tag::STRIP_OFFSETS, &offsets)
            .short(tag::SAMPLES_PER_PIXEL, &[self.samples_per_pixel])
            .long(tag::ROWS_PER_STRIP, &[self.rows_per_strip])
            .long(tag::STRIP_BYTE_COUNTS, &counts)
            .short(tag::PLANAR_CONFIG, &[if self.separate_planes { 2 } else { 1 }])
            .short(tag::SAMPLE_FORMAT, &vec![self.sample_format; spp]);
        if let Some(orientation) = self.orientation {
            ifd.short(tag::ORIENTATION, &[orientation]);
        }
        if let Some(predictor) = self.predictor {
            ifd.short(tag::PREDICTOR, &[predictor]);
        }
        if let Some(date) = &self.exif_date {
            let mut exif = IfdBuilder::new();
            exif.ascii(0x9003, date);
            let at = tiff.write_ifd(&exif).unwrap();
            ifd.long(tag::EXIF_IFD, &[at]);
        }
        tiff.push_ifd(&ifd).unwrap();
        std::fs::write(path, tiff.finish()).unwrap();
    }
}

// =========================================================================
// HEVC engine mock
// =========================================================================

/// Owned copy of an [`EncodeJob`] as the mock saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedJob {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: Chroma,
    pub samples: Vec<u16>,
    pub quality: HeifQuality,
    pub icc: Option<Vec<u8>>,
    pub thumbnail_box: Option<u32>,
    pub exif: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

/// Engine that reports configurable encoder depths, serves canned decode
/// results and records every encode. Encoded output is a parseable
/// container without real HEVC data.
/// Uses Mutex (not RefCell) so it is Sync like real engines.
#[derive(Default)]
pub struct MockEngine {
    max_depth: Option<u8>,
    supported: Vec<u8>,
    primary: Option<DecodedImage>,
    thumbnail: Option<DecodedImage>,
    pub jobs: Mutex<Vec<RecordedJob>>,
    pub targets: Mutex<Vec<DecodeTarget>>,
}

impl MockEngine {
    pub fn with_depths(max_depth: Option<u8>, supported: &[u8]) -> Self {
        Self {
            max_depth,
            supported: supported.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_primary(mut self, image: DecodedImage) -> Self {
        self.primary = Some(image);
        self
    }

    pub fn with_thumbnail(mut self, image: DecodedImage) -> Self {
        self.thumbnail = Some(image);
        self
    }

    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn decode_targets(&self) -> Vec<DecodeTarget> {
        self.targets.lock().unwrap().clone()
    }
}

impl HevcEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn max_encoder_bit_depth(&self) -> Option<u8> {
        self.max_depth
    }

    fn supports_encoder_bit_depth(&self, bits: u8) -> bool {
        self.supported.contains(&bits)
    }

    fn decode(&self, _path: &Path, target: DecodeTarget) -> Result<DecodedImage, CodecError> {
        self.targets.lock().unwrap().push(target);
        let canned = match target {
            DecodeTarget::Primary => &self.primary,
            DecodeTarget::Thumbnail => &self.thumbnail,
        };
        canned
            .clone()
            .ok_or_else(|| CodecError::Decode(format!("mock has no {target:?} image")))
    }

    fn encode(&self, job: &EncodeJob<'_>) -> Result<Vec<u8>, CodecError> {
        self.jobs.lock().unwrap().push(RecordedJob {
            width: job.width,
            height: job.height,
            bit_depth: job.bit_depth,
            chroma: job.chroma,
            samples: job.samples.to_vec(),
            quality: job.quality,
            icc: job.icc.map(<[u8]>::to_vec),
            thumbnail_box: job.thumbnail_box,
            exif: job.exif.map(<[u8]>::to_vec),
            xmp: job.xmp.map(<[u8]>::to_vec),
        });
        Ok(sample_file(
            job.width,
            job.height,
            job.bit_depth.saturating_sub(8),
            job.icc,
        ))
    }
}
