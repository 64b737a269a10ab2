//! Strip decoding: decompression, predictor reversal and conversion of
//! source samples into the canonical BGRA buffer.

use super::super::buffer::{CHANNELS, MAX_BUFFER_BYTES, PixelBuffer, Samples};
use super::super::calculations::{float_tone_curve, tone_map_sample};
use super::super::image::ColorModel;
use super::super::loader::CodecError;
use super::super::observer::Progress;
use super::ifd::{ByteOrder, Ifd, TiffFile, tag};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Color plus extra samples; anything wider is not a real image.
const MAX_SAMPLES_PER_PIXEL: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    PackBits,
    /// Recognised but not decodable here.
    Other(u32),
}

impl Compression {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::None,
            5 => Self::Lzw,
            8 | 32946 => Self::Deflate,
            32773 => Self::PackBits,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Photometric {
    MinIsWhite,
    MinIsBlack,
    Rgb,
    Palette,
    Separated,
    YCbCr,
    Other(u32),
}

impl Photometric {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::MinIsWhite,
            1 => Self::MinIsBlack,
            2 => Self::Rgb,
            3 => Self::Palette,
            5 => Self::Separated,
            6 => Self::YCbCr,
            other => Self::Other(other),
        }
    }

    /// Samples per pixel before extra samples.
    fn color_samples(self) -> u16 {
        match self {
            Self::MinIsWhite | Self::MinIsBlack | Self::Palette => 1,
            Self::Separated => 4,
            _ => 3,
        }
    }

    pub fn color_model(self, bits: u16) -> ColorModel {
        match self {
            Self::MinIsWhite | Self::MinIsBlack if bits == 1 => ColorModel::Monochrome,
            Self::MinIsWhite | Self::MinIsBlack => ColorModel::Grayscale,
            Self::Rgb => ColorModel::Rgb,
            Self::Palette => ColorModel::Indexed,
            Self::Separated => ColorModel::Cmyk,
            Self::YCbCr => ColorModel::YCbCr,
            Self::Other(8) => ColorModel::CieLab,
            Self::Other(32803) => ColorModel::Raw,
            Self::Other(_) => ColorModel::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Unsigned,
    Float,
    Other(u32),
}

/// Everything needed to decode the first directory's pixels.
#[derive(Debug, Clone)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub bits: u16,
    pub samples_per_pixel: u16,
    pub sample_format: SampleFormat,
    pub photometric: Photometric,
    pub separate_planes: bool,
    pub rows_per_strip: u32,
    pub compression: Compression,
    pub predictor: u32,
    pub has_alpha: bool,
    pub orientation: u16,
    pub order: ByteOrder,
    pub color_map: Option<Vec<u16>>,
    pub chroma_subsampled: bool,
    pub strip_offsets: Vec<u32>,
    pub strip_byte_counts: Vec<u32>,
}

impl Layout {
    /// Read and validate the header fields of `ifd`.
    pub fn from_ifd(ifd: &Ifd, order: ByteOrder) -> Result<Self, CodecError> {
        let width = ifd.value_or(tag::IMAGE_WIDTH, 0);
        let height = ifd.value_or(tag::IMAGE_LENGTH, 0);
        let bits = ifd.value_or(tag::BITS_PER_SAMPLE, 1) as u16;
        let samples_per_pixel = ifd.value_or(tag::SAMPLES_PER_PIXEL, 1) as u16;
        if width == 0 || height == 0 || bits == 0 || samples_per_pixel == 0 {
            return Err(CodecError::Rejected(format!(
                "invalid TIFF header: {width}x{height}, {bits} bits, {samples_per_pixel} samples"
            )));
        }
        let sample_format = match ifd.value_or(tag::SAMPLE_FORMAT, 1) {
            1 => SampleFormat::Unsigned,
            3 => SampleFormat::Float,
            other => SampleFormat::Other(other),
        };
        let photometric = match ifd.value(tag::PHOTOMETRIC) {
            Some(code) => Photometric::from_code(code),
            None if samples_per_pixel >= 3 => Photometric::Rgb,
            None => Photometric::MinIsBlack,
        };
        let rows_per_strip = ifd.value_or(tag::ROWS_PER_STRIP, height).clamp(1, height);
        let extra = ifd.values(tag::EXTRA_SAMPLES).unwrap_or_default();
        // Writers that omit ExtraSamples still mean alpha for RGBA and gray+alpha.
        let has_alpha = samples_per_pixel > photometric.color_samples()
            && (!extra.is_empty()
                || matches!(
                    photometric,
                    Photometric::Rgb | Photometric::MinIsBlack | Photometric::MinIsWhite
                ));
        let color_map = ifd
            .values(tag::COLOR_MAP)
            .map(|v| v.into_iter().map(|s| s as u16).collect());

        Ok(Self {
            width,
            height,
            bits,
            samples_per_pixel,
            sample_format,
            photometric,
            separate_planes: ifd.value_or(tag::PLANAR_CONFIG, 1) == 2,
            rows_per_strip,
            compression: Compression::from_code(ifd.value_or(tag::COMPRESSION, 1)),
            predictor: ifd.value_or(tag::PREDICTOR, 1),
            has_alpha,
            orientation: ifd.value_or(tag::ORIENTATION, 1) as u16,
            order,
            color_map,
            chroma_subsampled: ifd
                .values(tag::YCBCR_SUBSAMPLING)
                .is_some_and(|v| v.iter().any(|&f| f != 1)),
            strip_offsets: ifd.values(tag::STRIP_OFFSETS).unwrap_or_default(),
            strip_byte_counts: ifd.values(tag::STRIP_BYTE_COUNTS).unwrap_or_default(),
        })
    }

    pub fn is_float(&self) -> bool {
        self.sample_format == SampleFormat::Float
    }

    /// Whether the canonical buffer is 16 bits per channel.
    pub fn sixteen_bit(&self) -> bool {
        self.bits > 8
    }

    pub fn strips_per_plane(&self) -> usize {
        self.height.div_ceil(self.rows_per_strip) as usize
    }

    /// Samples stored per row of one strip.
    fn row_samples(&self) -> usize {
        if self.separate_planes {
            self.width as usize
        } else {
            self.width as usize * self.samples_per_pixel as usize
        }
    }

    fn row_bytes(&self) -> usize {
        (self.row_samples() * self.bits as usize).div_ceil(8)
    }

    /// Decompressed size of a strip of `rows` rows, refused past the
    /// allocation limit.
    fn strip_len(&self, rows: u32) -> Result<usize, CodecError> {
        (self.row_bytes() as u64)
            .checked_mul(rows as u64)
            .filter(|&len| len <= MAX_BUFFER_BYTES)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(CodecError::Allocation {
                width: self.width,
                height: rows,
                bytes_per_pixel: (self.samples_per_pixel as u32 * self.bits as u32).div_ceil(8),
            })
    }

    /// Refuse layouts the pixel decoder cannot handle.
    pub fn check_decodable(&self) -> Result<(), CodecError> {
        let reject = |why: String| Err(CodecError::Rejected(why));
        if self.strip_offsets.is_empty() {
            return reject("TIFF has no strip offsets (tiled images are not supported)".into());
        }
        if self.strip_offsets.len() != self.strip_byte_counts.len() {
            return reject("strip offsets and byte counts disagree".into());
        }
        let expected = self.strips_per_plane()
            * if self.separate_planes {
                self.samples_per_pixel as usize
            } else {
                1
            };
        if self.strip_offsets.len() != expected {
            return reject(format!(
                "expected {expected} strips for {} rows at {} rows per strip, found {}",
                self.height,
                self.rows_per_strip,
                self.strip_offsets.len()
            ));
        }
        if self.samples_per_pixel > MAX_SAMPLES_PER_PIXEL {
            return reject(format!("{} samples per pixel", self.samples_per_pixel));
        }
        if self.samples_per_pixel < self.photometric.color_samples() {
            return reject(format!(
                "{} samples per pixel is too few for {:?}",
                self.samples_per_pixel, self.photometric
            ));
        }
        if let Compression::Other(code) = self.compression {
            return Err(CodecError::Unsupported(format!("TIFF compression {code}")));
        }
        if !matches!(self.predictor, 1 | 2) {
            return Err(CodecError::Unsupported(format!("TIFF predictor {}", self.predictor)));
        }
        // Horizontal differencing is only undone on whole-byte integers.
        if self.predictor == 2
            && !(self.sample_format == SampleFormat::Unsigned && matches!(self.bits, 8 | 16))
        {
            return Err(CodecError::Unsupported(format!(
                "TIFF predictor 2 on {}-bit {:?} samples",
                self.bits, self.sample_format
            )));
        }
        match (self.sample_format, self.bits) {
            (SampleFormat::Unsigned, 1 | 2 | 4 | 8 | 16) => {}
            (SampleFormat::Float, 16 | 32) => {}
            (format, bits) => return reject(format!("{bits}-bit {format:?} samples")),
        }
        let wide = self.bits > 8;
        match self.photometric {
            Photometric::MinIsBlack | Photometric::MinIsWhite | Photometric::Rgb => {}
            Photometric::Palette if !wide && !self.separate_planes && self.color_map.is_some() => {}
            Photometric::Separated if self.bits == 8 && !self.separate_planes => {}
            Photometric::YCbCr
                if self.bits == 8 && !self.separate_planes && !self.chroma_subsampled => {}
            other => {
                return reject(format!("{other:?} at {} bits is not supported", self.bits));
            }
        }
        if self.is_float()
            && !matches!(self.photometric, Photometric::Rgb | Photometric::MinIsBlack)
        {
            return reject("float samples need RGB or grayscale".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Strip payloads
// ---------------------------------------------------------------------------

/// Output buffer for one strip, reserved without aborting on failure.
fn strip_buffer(expected: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.try_reserve_exact(expected)
        .map_err(|e| CodecError::Decode(format!("cannot reserve {expected} strip bytes: {e}")))?;
    Ok(out)
}

pub fn unpack_bits(data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = strip_buffer(expected)?;
    let mut i = 0;
    while i < data.len() && out.len() < expected {
        let n = data[i] as i8;
        i += 1;
        match n {
            0..=127 => {
                let len = n as usize + 1;
                let run = data
                    .get(i..i + len)
                    .ok_or_else(|| CodecError::Decode("PackBits literal overruns strip".into()))?;
                out.extend_from_slice(run);
                i += len;
            }
            -127..=-1 => {
                let byte = *data
                    .get(i)
                    .ok_or_else(|| CodecError::Decode("PackBits run overruns strip".into()))?;
                out.extend(std::iter::repeat_n(byte, (1 - n as isize) as usize));
                i += 1;
            }
            // -128 is a no-op
            _ => {}
        }
    }
    Ok(out)
}

fn decompress(compression: Compression, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = match compression {
        Compression::None => data.to_vec(),
        Compression::PackBits => unpack_bits(data, expected)?,
        Compression::Lzw => weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .decode(data)
            .map_err(|e| CodecError::Decode(format!("LZW: {e:?}")))?,
        Compression::Deflate => {
            let mut out = strip_buffer(expected)?;
            ZlibDecoder::new(data)
                .take(expected as u64)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decode(format!("deflate: {e}")))?;
            out
        }
        Compression::Other(code) => {
            return Err(CodecError::Unsupported(format!("TIFF compression {code}")));
        }
    };
    if out.len() < expected {
        return Err(CodecError::Decode(format!(
            "strip holds {} bytes, expected {expected}",
            out.len()
        )));
    }
    out.truncate(expected);
    Ok(out)
}

/// Undo horizontal differencing in place.
fn reverse_predictor(layout: &Layout, data: &mut [u8]) {
    let stride = if layout.separate_planes {
        1
    } else {
        layout.samples_per_pixel as usize
    };
    let row_bytes = layout.row_bytes();
    for row in data.chunks_exact_mut(row_bytes) {
        match layout.bits {
            8 => {
                for i in stride..row.len() {
                    row[i] = row[i].wrapping_add(row[i - stride]);
                }
            }
            16 => {
                let order = layout.order;
                for i in stride..row.len() / 2 {
                    let prev = order.u16(&row[(i - stride) * 2..]);
                    let cur = order.u16(&row[i * 2..]);
                    let sum = cur.wrapping_add(prev);
                    let bytes = match order {
                        ByteOrder::Little => sum.to_le_bytes(),
                        ByteOrder::Big => sum.to_be_bytes(),
                    };
                    row[i * 2..i * 2 + 2].copy_from_slice(&bytes);
                }
            }
            _ => {}
        }
    }
}

/// Unsigned integer samples of one row.
fn unpack_row(layout: &Layout, row: &[u8], out: &mut Vec<u16>) {
    out.clear();
    let n = layout.row_samples();
    match layout.bits {
        8 => out.extend(row[..n].iter().map(|&b| b as u16)),
        16 => out.extend(row.chunks_exact(2).take(n).map(|c| layout.order.u16(c))),
        bits => {
            let bits = bits as usize;
            let mask = (1u16 << bits) - 1;
            for i in 0..n {
                let bit = i * bits;
                let byte = row[bit / 8] as u16;
                let shift = 8 - bits - bit % 8;
                out.push((byte >> shift) & mask);
            }
        }
    }
}

/// IEEE half precision to single precision.
fn half_to_f32(h: u16) -> f32 {
    let sign = if h & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((h >> 10) & 0x1f) as i32;
    let mantissa = (h & 0x3ff) as f32;
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        31 if mantissa == 0.0 => sign * f32::INFINITY,
        31 => f32::NAN,
        e => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(e - 15),
    }
}

/// Float samples of one row.
fn float_row(layout: &Layout, row: &[u8], out: &mut Vec<f32>) {
    out.clear();
    let n = layout.row_samples();
    if layout.bits == 16 {
        out.extend(row.chunks_exact(2).take(n).map(|c| half_to_f32(layout.order.u16(c))));
    } else {
        out.extend(
            row.chunks_exact(4)
                .take(n)
                .map(|c| f32::from_bits(layout.order.u32(c))),
        );
    }
}

/// Decoded rows of one strip and where they land.
struct Strip {
    data: Vec<u8>,
    first_row: u32,
    rows: u32,
    /// Channel carried by the strip in separate-plane files.
    plane: usize,
}

fn read_strip(file: &TiffFile<'_>, layout: &Layout, index: usize) -> Result<Strip, CodecError> {
    let per_plane = layout.strips_per_plane();
    let (plane, band) = if layout.separate_planes {
        (index / per_plane, index % per_plane)
    } else {
        (0, index)
    };
    let first_row = band as u32 * layout.rows_per_strip;
    let rows = layout.rows_per_strip.min(layout.height - first_row);
    let raw = file
        .slice(layout.strip_offsets[index], layout.strip_byte_counts[index])
        .ok_or_else(|| CodecError::Decode(format!("strip {index} lies outside the file")))?;
    let mut data = decompress(layout.compression, raw, layout.strip_len(rows)?)?;
    if layout.predictor == 2 {
        reverse_predictor(layout, &mut data);
    }
    Ok(Strip {
        data,
        first_row,
        rows,
        plane,
    })
}

// ---------------------------------------------------------------------------
// Pixel conversion
// ---------------------------------------------------------------------------

/// Scale a `bits`-wide sample to the canonical depth.
fn scale(value: u16, bits: u16, sixteen: bool) -> u16 {
    match (bits, sixteen) {
        (16, true) | (8, false) => value,
        (b, false) => (value as u32 * 255 / ((1u32 << b) - 1)) as u16,
        (b, true) => (value as u32 * 65535 / ((1u32 << b) - 1)) as u16,
    }
}

/// One contiguous pixel converted to `[b, g, r, a]` at canonical depth.
fn contiguous_pixel(layout: &Layout, s: &[u16], sixteen: bool) -> [u16; 4] {
    let max = if sixteen { u16::MAX } else { u8::MAX as u16 };
    let bits = layout.bits;
    let gray = |v: u16| {
        let v = scale(v, bits, sixteen);
        if layout.photometric == Photometric::MinIsWhite {
            max - v
        } else {
            v
        }
    };
    match layout.photometric {
        Photometric::MinIsBlack | Photometric::MinIsWhite => {
            let v = gray(s[0]);
            let a = if layout.has_alpha { scale(s[1], bits, sixteen) } else { max };
            [v, v, v, a]
        }
        Photometric::Palette => {
            let entries = 1usize << bits;
            let map = layout.color_map.as_deref().unwrap_or(&[]);
            let i = s[0] as usize;
            let pick = |c: usize| map.get(c * entries + i).copied().unwrap_or(0) >> 8;
            [pick(2), pick(1), pick(0), max]
        }
        Photometric::Separated => {
            let k = 255 - s[3] as u32;
            let ink = |c: u16| ((255 - c as u32) * k / 255) as u16;
            let a = if layout.has_alpha { s[4] } else { max };
            [ink(s[2]), ink(s[1]), ink(s[0]), a]
        }
        Photometric::YCbCr => {
            let y = s[0] as f32;
            let cb = s[1] as f32 - 128.0;
            let cr = s[2] as f32 - 128.0;
            let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u16;
            let r = clamp(y + 1.402 * cr);
            let g = clamp(y - 0.344_136 * cb - 0.714_136 * cr);
            let b = clamp(y + 1.772 * cb);
            let a = if layout.has_alpha { s[3] } else { max };
            [b, g, r, a]
        }
        _ => {
            let c = |i: usize| scale(s[i], bits, sixteen);
            let a = if layout.has_alpha { c(3) } else { max };
            [c(2), c(1), c(0), a]
        }
    }
}

/// Canonical channel indices a plane's samples are written to.
fn plane_targets(layout: &Layout, plane: usize) -> &'static [usize] {
    let gray = matches!(
        layout.photometric,
        Photometric::MinIsBlack | Photometric::MinIsWhite
    );
    match (gray, plane) {
        (true, 0) => &[0, 1, 2],
        (true, 1) => &[3],
        (false, 0) => &[2],
        (false, 1) => &[1],
        (false, 2) => &[0],
        (false, 3) => &[3],
        _ => &[],
    }
}

fn store(samples: &mut Samples, index: usize, value: u16) {
    match samples {
        Samples::Eight(v) => v[index] = value as u8,
        Samples::Sixteen(v) => v[index] = value,
    }
}

fn place_integer_strip(layout: &Layout, strip: &Strip, buffer: &mut PixelBuffer) {
    let sixteen = buffer.sixteen_bit();
    let width = layout.width as usize;
    let row_bytes = layout.row_bytes();
    let max = if sixteen { u16::MAX } else { u8::MAX as u16 };
    let mut row = Vec::with_capacity(layout.row_samples());
    let samples = buffer.samples_mut();

    for r in 0..strip.rows as usize {
        let y = strip.first_row as usize + r;
        unpack_row(layout, &strip.data[r * row_bytes..(r + 1) * row_bytes], &mut row);
        let line = y * width * CHANNELS;
        if layout.separate_planes {
            let targets = plane_targets(layout, strip.plane);
            let invert = layout.photometric == Photometric::MinIsWhite && strip.plane == 0;
            for (x, &v) in row.iter().enumerate() {
                let v = scale(v, layout.bits, sixteen);
                let v = if invert { max - v } else { v };
                for &c in targets {
                    store(samples, line + x * CHANNELS + c, v);
                }
            }
        } else {
            let spp = layout.samples_per_pixel as usize;
            for (x, s) in row.chunks_exact(spp).enumerate() {
                let px = contiguous_pixel(layout, s, sixteen);
                for (c, &v) in px.iter().enumerate() {
                    store(samples, line + x * CHANNELS + c, v);
                }
            }
        }
    }
}

/// Decode an unsigned-integer TIFF strip by strip into a fresh buffer.
pub fn decode_integer(
    file: &TiffFile<'_>,
    layout: &Layout,
    progress: &mut Progress<'_>,
) -> Result<PixelBuffer, CodecError> {
    let mut buffer = PixelBuffer::new(layout.width, layout.height, layout.sixteen_bit())?;
    let strips = layout.strip_offsets.len();
    let mut checkpoints = progress.slice(strips, 0.1, 0.9);
    for index in 0..strips {
        progress.tick(&mut checkpoints, index)?;
        let strip = read_strip(file, layout, index)?;
        place_integer_strip(layout, &strip, &mut buffer);
    }
    Ok(buffer)
}

/// Decode a floating-point TIFF in two passes: find the peak, then tone
/// map into 16 bits. Half floats are scaled linearly.
pub fn decode_float(
    file: &TiffFile<'_>,
    layout: &Layout,
    progress: &mut Progress<'_>,
) -> Result<PixelBuffer, CodecError> {
    let strips = layout.strip_offsets.len();
    let width = layout.width as usize;
    let row_bytes = layout.row_bytes();
    let spp = layout.samples_per_pixel as usize;
    let color = layout.photometric.color_samples() as usize;
    let is_alpha = |sample: usize| layout.has_alpha && sample >= color;
    let mut row = Vec::with_capacity(layout.row_samples());

    let (factor, curve) = if layout.bits == 32 {
        let mut peak = 0f32;
        let mut checkpoints = progress.slice(strips, 0.1, 0.5);
        for index in 0..strips {
            progress.tick(&mut checkpoints, index)?;
            let strip = read_strip(file, layout, index)?;
            for r in 0..strip.rows as usize {
                float_row(layout, &strip.data[r * row_bytes..(r + 1) * row_bytes], &mut row);
                for (i, &v) in row.iter().enumerate() {
                    let sample = if layout.separate_planes { strip.plane } else { i % spp };
                    if !is_alpha(sample) && v.is_finite() {
                        peak = peak.max(v);
                    }
                }
            }
        }
        tracing::debug!(peak, "float TIFF peak sample");
        float_tone_curve(peak)
    } else {
        (1.0, 1.0)
    };

    let mut buffer = PixelBuffer::new_sixteen(layout.width, layout.height)?;
    let linear = |v: f32| (v.clamp(0.0, 1.0) * 65535.0).round() as u16;
    let mut checkpoints = progress.slice(strips, 0.5, 0.9);
    for index in 0..strips {
        progress.tick(&mut checkpoints, index)?;
        let strip = read_strip(file, layout, index)?;
        let Samples::Sixteen(out) = buffer.samples_mut() else {
            return Err(CodecError::Decode("float TIFF needs a 16-bit buffer".into()));
        };
        for r in 0..strip.rows as usize {
            let y = strip.first_row as usize + r;
            float_row(layout, &strip.data[r * row_bytes..(r + 1) * row_bytes], &mut row);
            for (i, &v) in row.iter().enumerate() {
                let (x, sample) = if layout.separate_planes {
                    (i, strip.plane)
                } else {
                    (i / spp, i % spp)
                };
                let mapped = if is_alpha(sample) || layout.bits == 16 {
                    linear(v)
                } else {
                    tone_map_sample(v, factor, curve)
                };
                let base = (y * width + x) * CHANNELS;
                let targets: &[usize] = match (color, sample) {
                    (1, 0) => &[0, 1, 2],
                    (_, s) if is_alpha(s) => &[3],
                    (3, 0) => &[2],
                    (3, 1) => &[1],
                    (3, 2) => &[0],
                    _ => &[],
                };
                for &c in targets {
                    out[base + c] = mapped;
                }
            }
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packbits_literal_and_run() {
        // 3 literal bytes, then 0xAA repeated 4 times, then a no-op
        let data = [2, 1, 2, 3, 0xFD, 0xAA, 0x80];
        assert_eq!(unpack_bits(&data, 7).unwrap(), vec![1, 2, 3, 0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn packbits_truncated_literal_fails() {
        assert!(unpack_bits(&[5, 1, 2], 6).is_err());
    }

    #[test]
    fn lzw_strip_decodes() {
        let plain: Vec<u8> = (0..200u32).map(|i| (i % 7) as u8).collect();
        let packed = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(&plain)
            .unwrap();
        assert_eq!(decompress(Compression::Lzw, &packed, 200).unwrap(), plain);
    }

    #[test]
    fn short_strip_is_an_error() {
        assert!(matches!(
            decompress(Compression::None, &[1, 2, 3], 4),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn deflate_stops_at_expected_length() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&[7u8; 10_000]).unwrap();
        let packed = encoder.finish().unwrap();
        assert_eq!(decompress(Compression::Deflate, &packed, 100).unwrap(), vec![7u8; 100]);
    }

    fn rgb_layout(width: u32, height: u32, bits: u16) -> Layout {
        Layout {
            width,
            height,
            bits,
            samples_per_pixel: 3,
            sample_format: SampleFormat::Unsigned,
            photometric: Photometric::Rgb,
            separate_planes: false,
            rows_per_strip: height,
            compression: Compression::None,
            predictor: 1,
            has_alpha: false,
            orientation: 1,
            order: ByteOrder::Little,
            color_map: None,
            chroma_subsampled: false,
            strip_offsets: vec![8],
            strip_byte_counts: vec![width * height * 3 * u32::from(bits / 8)],
        }
    }

    #[test]
    fn strip_length_is_bounded() {
        let layout = rgb_layout(100_000, 1, 16);
        assert_eq!(layout.strip_len(2).unwrap(), 1_200_000);
        let err = layout.strip_len(u32::MAX).unwrap_err();
        assert!(matches!(err, CodecError::Allocation { width: 100_000, bytes_per_pixel: 6, .. }));
    }

    #[test]
    fn layout_checks_sample_count_and_predictor() {
        assert!(rgb_layout(4, 4, 8).check_decodable().is_ok());

        let mut wide = rgb_layout(4, 4, 8);
        wide.samples_per_pixel = MAX_SAMPLES_PER_PIXEL + 1;
        assert!(matches!(wide.check_decodable(), Err(CodecError::Rejected(_))));

        let mut differenced = rgb_layout(4, 4, 8);
        differenced.predictor = 2;
        assert!(differenced.check_decodable().is_ok());
        differenced.bits = 4;
        assert!(matches!(differenced.check_decodable(), Err(CodecError::Unsupported(_))));

        let mut float = rgb_layout(4, 4, 32);
        float.sample_format = SampleFormat::Float;
        assert!(float.check_decodable().is_ok());
        float.predictor = 2;
        assert!(matches!(float.check_decodable(), Err(CodecError::Unsupported(_))));
    }

    #[test]
    fn half_float_values() {
        assert_eq!(half_to_f32(0x3C00), 1.0);
        assert_eq!(half_to_f32(0x3800), 0.5);
        assert_eq!(half_to_f32(0xC000), -2.0);
        assert_eq!(half_to_f32(0x0000), 0.0);
    }

    #[test]
    fn sub_byte_samples_scale_to_full_range() {
        assert_eq!(scale(1, 1, false), 255);
        assert_eq!(scale(15, 4, true), 65535);
        assert_eq!(scale(2, 2, false), 170);
    }

    #[test]
    fn compression_codes() {
        assert_eq!(Compression::from_code(32946), Compression::Deflate);
        assert_eq!(Compression::from_code(7), Compression::Other(7));
        assert_eq!(Compression::from_code(5), Compression::Lzw);
    }

    #[test]
    fn photometric_models() {
        assert_eq!(Photometric::from_code(1).color_model(1), ColorModel::Monochrome);
        assert_eq!(Photometric::from_code(5).color_model(8), ColorModel::Cmyk);
        assert_eq!(Photometric::from_code(8).color_model(8), ColorModel::CieLab);
    }
}
