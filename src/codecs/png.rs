//! PNG adapter.
//!
//! Pixel rows come from the `png` crate with `EXPAND` on, so palette,
//! `tRNS` and sub-byte depths arrive as plain 8-bit gray/RGB(A) or 16-bit
//! big-endian samples. Interlaced files are consumed pass by pass and each
//! pass row is scattered to its Adam7 positions. Ancillary chunks (`iCCP`,
//! `gAMA`, `eXIf`, text) are read by walking the chunk list directly.
//!
//! Progress: 0.1 after the header, rows span 0.1–0.8, 0.9 after
//! post-processing.

use super::atomic::AtomicFile;
use super::buffer::{CHANNELS, PixelBuffer, Samples};
use super::image::{ColorModel, ColorProfile, Image, keys};
use super::loader::{CodecError, ImageLoader, LoadFlags, loading_failed};
use super::metadata::{
    self, MetadataBlocks, RAW_PROFILE_PREFIX, decode_raw_profile, encode_raw_profile,
    iptc_from_photoshop,
};
use super::observer::{LoadObserver, Progress};
use super::params::PngSaveOptions;
use super::pixels::{SourceLayout, apply_gamma, row_to_bgra};
use flate2::Compression as ZlibLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const XMP_KEYWORD: &str = "XML:com.adobe.xmp";
const SOFTWARE_KEYWORD: &str = "Software";

/// Display gamma the decoder corrects towards.
const SCREEN_GAMMA: f64 = 2.2;

#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl PngCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for PngCodec {
    fn format_name(&self) -> &'static str {
        "PNG"
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, CodecError> {
        load_png(path, flags, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), CodecError> {
        save_png(image, path, Progress::new(observer))
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

// ---------------------------------------------------------------------------
// Chunk walking
// ---------------------------------------------------------------------------

/// Ancillary information gathered from the raw chunk list.
#[derive(Debug, Default)]
struct Ancillary {
    icc: Option<Vec<u8>>,
    gamma: Option<f64>,
    exif: Option<Vec<u8>>,
    texts: Vec<(String, String)>,
}

/// Iterate `(type, data)` over the chunks after the signature, stopping at
/// `IEND` or at the first truncated chunk.
fn chunks(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = SIGNATURE.len();
    std::iter::from_fn(move || {
        if pos + 8 > data.len() {
            return None;
        }
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let kind = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let start = pos + 8;
        let end = start.checked_add(len)?;
        if end + 4 > data.len() || &kind == b"IEND" {
            return None;
        }
        pos = end + 4;
        Some((kind, &data[start..end]))
    })
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn split_keyword(data: &[u8]) -> Option<(String, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    Some((latin1(&data[..nul]), &data[nul + 1..]))
}

fn read_ancillary(data: &[u8]) -> Ancillary {
    let mut out = Ancillary::default();
    for (kind, body) in chunks(data) {
        match &kind {
            b"iCCP" => {
                out.icc = split_keyword(body)
                    .and_then(|(_, rest)| rest.split_first().map(|(_, z)| z))
                    .and_then(inflate);
                if out.icc.is_none() {
                    tracing::warn!("unreadable iCCP chunk ignored");
                }
            }
            b"gAMA" if body.len() == 4 => {
                let raw = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                if raw > 0 {
                    out.gamma = Some(raw as f64 / 100_000.0);
                }
            }
            b"eXIf" => out.exif = Some(body.to_vec()),
            b"tEXt" => {
                if let Some((key, text)) = split_keyword(body) {
                    out.texts.push((key, latin1(text)));
                }
            }
            b"zTXt" => {
                let text = split_keyword(body).and_then(|(key, rest)| {
                    let (_, compressed) = rest.split_first()?;
                    Some((key, latin1(&inflate(compressed)?)))
                });
                match text {
                    Some(entry) => out.texts.push(entry),
                    None => tracing::warn!("unreadable zTXt chunk ignored"),
                }
            }
            b"iTXt" => match parse_itxt(body) {
                Some(entry) => out.texts.push(entry),
                None => tracing::warn!("unreadable iTXt chunk ignored"),
            },
            _ => {}
        }
    }
    out
}

/// `keyword\0 flag method lang\0 translated\0 text`
fn parse_itxt(body: &[u8]) -> Option<(String, String)> {
    let (key, rest) = split_keyword(body)?;
    let (&compressed, rest) = rest.split_first()?;
    let (_, rest) = rest.split_first()?;
    let lang_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    let text = &rest[translated_end + 1..];
    let text = if compressed == 1 {
        String::from_utf8(inflate(text)?).ok()?
    } else {
        String::from_utf8_lossy(text).into_owned()
    };
    Some((key, text))
}

/// Route text entries: raw-profile keys and XMP become metadata blocks,
/// everything else is embedded text.
fn sort_texts(
    texts: Vec<(String, String)>,
    blocks: &mut MetadataBlocks,
) -> Vec<(String, String)> {
    let mut comments = Vec::new();
    for (key, text) in texts {
        if key == XMP_KEYWORD {
            blocks.set_xmp(text.as_bytes());
            continue;
        }
        let Some(kind) = key.strip_prefix(RAW_PROFILE_PREFIX) else {
            comments.push((key, text));
            continue;
        };
        let Some(data) = decode_raw_profile(&text) else {
            tracing::warn!(key = %key, "undecodable raw profile ignored");
            continue;
        };
        match kind.to_ascii_lowercase().as_str() {
            "exif" => blocks.set_exif(&data),
            "iptc" | "8bim" => match iptc_from_photoshop(&data) {
                Some(iim) => blocks.set_iptc(iim),
                None => blocks.set_iptc(&data),
            },
            "xmp" => blocks.set_xmp(&data),
            "app1" if data.starts_with(b"Exif\0\0") => blocks.set_exif(&data),
            "app1" => blocks.set_xmp(&data),
            _ => {}
        }
    }
    comments
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Adam7 passes as (x start, y start, x step, y step).
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Rows delivered by the decoder, in order, as (pass, y, pass width).
/// Passes without pixels are skipped, as the decoder does.
fn adam7_rows(width: u32, height: u32) -> Vec<(usize, u32, u32)> {
    let mut rows = Vec::new();
    for (pass, &(x0, y0, dx, dy)) in ADAM7.iter().enumerate() {
        if width <= x0 || height <= y0 {
            continue;
        }
        let pass_width = (width - x0).div_ceil(dx);
        let mut y = y0;
        while y < height {
            rows.push((pass, y, pass_width));
            y += dy;
        }
    }
    rows
}

fn decode_error(e: ::png::DecodingError) -> CodecError {
    match e {
        ::png::DecodingError::IoError(io) => CodecError::Io(io),
        ::png::DecodingError::LimitsExceeded => CodecError::Allocation {
            width: 0,
            height: 0,
            bytes_per_pixel: 0,
        },
        other => CodecError::Decode(other.to_string()),
    }
}

fn color_model(color: ::png::ColorType) -> ColorModel {
    match color {
        ::png::ColorType::Grayscale | ::png::ColorType::GrayscaleAlpha => ColorModel::Grayscale,
        ::png::ColorType::Indexed => ColorModel::Indexed,
        ::png::ColorType::Rgb | ::png::ColorType::Rgba => ColorModel::Rgb,
    }
}

fn layout(color: ::png::ColorType) -> Result<SourceLayout, CodecError> {
    match color {
        ::png::ColorType::Grayscale => Ok(SourceLayout::Gray),
        ::png::ColorType::GrayscaleAlpha => Ok(SourceLayout::GrayAlpha),
        ::png::ColorType::Rgb => Ok(SourceLayout::Rgb),
        ::png::ColorType::Rgba => Ok(SourceLayout::Rgba),
        ::png::ColorType::Indexed => Err(CodecError::Decode(
            "palette was not expanded by the decoder".into(),
        )),
    }
}

fn load_png(path: &Path, flags: LoadFlags, mut progress: Progress<'_>) -> Result<Image, CodecError> {
    let data = std::fs::read(path)?;
    if data.len() < SIGNATURE.len() || data[..SIGNATURE.len()] != SIGNATURE {
        return Err(CodecError::Rejected("missing PNG signature".into()));
    }

    let mut decoder = ::png::Decoder::new(Cursor::new(&data[..]));
    decoder.set_transformations(::png::Transformations::EXPAND);
    let mut reader = decoder.read_info().map_err(decode_error)?;

    let info = reader.info();
    let (width, height) = (info.width, info.height);
    let source_color = info.color_type;
    let source_depth = info.bit_depth as u8;
    let interlaced = info.interlaced;
    let has_alpha = matches!(
        source_color,
        ::png::ColorType::Rgba | ::png::ColorType::GrayscaleAlpha
    ) || info.trns.is_some();
    let sixteen_bit = source_depth == 16;
    tracing::debug!(
        width,
        height,
        ?source_color,
        source_depth,
        interlaced,
        "PNG header"
    );

    let mut image = Image::header(width, height, sixteen_bit, has_alpha);
    image.set_origin("PNG", color_model(source_color), source_depth as u32);

    let ancillary = read_ancillary(&data);
    if flags.contains(LoadFlags::ICC_PROFILE) {
        image.icc_profile = ancillary.icc.clone().and_then(ColorProfile::new);
    }
    let mut blocks = MetadataBlocks::default();
    if let Some(exif) = &ancillary.exif {
        blocks.set_exif(exif);
    }
    let comments = sort_texts(ancillary.texts, &mut blocks);
    if flags.wants_text() {
        image.embedded_text.extend(comments);
    }

    if flags.wants_pixels() {
        progress.report(0.1);
        let (out_color, out_depth) = reader.output_color_type();
        let layout = layout(out_color)?;
        let out_sixteen = out_depth == ::png::BitDepth::Sixteen;
        let mut buffer = PixelBuffer::new(width, height, out_sixteen)?;

        let schedule: Vec<(usize, u32, u32)> = if interlaced {
            adam7_rows(width, height)
        } else {
            (0..height).map(|y| (0, y, width)).collect()
        };
        let mut checkpoints = progress.slice(schedule.len(), 0.1, 0.8);
        let mut bgra = vec![0u16; width as usize * CHANNELS];
        let mut bgra8 = vec![0u8; width as usize * CHANNELS];

        for (index, &(pass, y, pass_width)) in schedule.iter().enumerate() {
            progress.tick(&mut checkpoints, index)?;
            let row = reader
                .next_row()
                .map_err(decode_error)?
                .ok_or_else(|| CodecError::Decode(format!("image data ends before row {y}")))?;
            let row = row.data();
            let (x0, dx) = if interlaced {
                (ADAM7[pass].0 as usize, ADAM7[pass].2 as usize)
            } else {
                (0, 1)
            };
            let n = pass_width as usize;
            let line = y as usize * width as usize * CHANNELS;

            match buffer.samples_mut() {
                Samples::Sixteen(out) => {
                    let samples: Vec<u16> = row
                        .chunks_exact(2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]]))
                        .collect();
                    row_to_bgra(&samples, layout, u16::MAX, &mut bgra[..n * CHANNELS]);
                    for i in 0..n {
                        let dst = line + (x0 + i * dx) * CHANNELS;
                        out[dst..dst + CHANNELS]
                            .copy_from_slice(&bgra[i * CHANNELS..(i + 1) * CHANNELS]);
                    }
                }
                Samples::Eight(out) => {
                    row_to_bgra(row, layout, u8::MAX, &mut bgra8[..n * CHANNELS]);
                    if dx == 1 {
                        out[line..line + n * CHANNELS].copy_from_slice(&bgra8[..n * CHANNELS]);
                    } else {
                        for i in 0..n {
                            let dst = line + (x0 + i * dx) * CHANNELS;
                            out[dst..dst + CHANNELS]
                                .copy_from_slice(&bgra8[i * CHANNELS..(i + 1) * CHANNELS]);
                        }
                    }
                }
            }
        }

        if let (Some(file_gamma), None) = (ancillary.gamma, &ancillary.icc) {
            let exponent = 1.0 / (file_gamma * SCREEN_GAMMA);
            if (exponent - 1.0).abs() > 1e-3 {
                tracing::debug!(file_gamma, exponent, "applying PNG gamma");
                apply_gamma(&mut buffer, exponent);
            }
        }
        progress.report(0.9);
        image.sixteen_bit = buffer.sixteen_bit();
        image.pixels = Some(buffer);
    }

    metadata::attach_to_image(&mut image, path, flags, blocks)?;
    progress.finish();
    Ok(image)
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

fn encode_error(e: ::png::EncodingError) -> CodecError {
    match e {
        ::png::EncodingError::IoError(io) => CodecError::Io(io),
        other => CodecError::Encode(other.to_string()),
    }
}

/// Bucket a zlib level 0-9 onto the encoder's presets.
///
/// The `png` encoder only takes presets, so neighbouring levels inside one
/// bucket produce identical output: 0-2 fast, 3-6 default, 7-9 best.
fn zlib_level(level: u8) -> ::png::Compression {
    match level {
        0..=2 => ::png::Compression::Fast,
        3..=6 => ::png::Compression::Default,
        _ => ::png::Compression::Best,
    }
}

fn valid_keyword(key: &str) -> bool {
    (1..=79).contains(&key.len()) && key.chars().all(|c| (' '..='~').contains(&c))
}

fn text_chunk(key: &str, text: &str) -> ([u8; 4], Vec<u8>) {
    let mut body = key.as_bytes().to_vec();
    body.push(0);
    if text.chars().all(|c| (c as u32) < 256) {
        body.extend(text.chars().map(|c| c as u8));
        (*b"tEXt", body)
    } else {
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(text.as_bytes());
        (*b"iTXt", body)
    }
}

fn compressed(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Ancillary chunks written between `IHDR` and the image data.
fn ancillary_chunks(image: &Image) -> Result<Vec<([u8; 4], Vec<u8>)>, CodecError> {
    let mut out = Vec::new();
    if let Some(icc) = &image.icc_profile {
        let mut body = b"ICC Profile\0\0".to_vec();
        body.extend(compressed(icc.data())?);
        out.push((*b"iCCP", body));
    }
    if let Some(exif) = &image.metadata.exif {
        out.push((*b"eXIf", exif.clone()));
    }
    if let Some(iptc) = &image.metadata.iptc {
        let key = format!("{RAW_PROFILE_PREFIX}iptc");
        out.push(text_chunk(&key, &encode_raw_profile("iptc", iptc)));
    }
    if let Some(xmp) = &image.metadata.xmp {
        let mut body = XMP_KEYWORD.as_bytes().to_vec();
        body.extend_from_slice(&[0, 0, 0, 0, 0]);
        body.extend_from_slice(xmp);
        out.push((*b"iTXt", body));
    }
    for (key, text) in &image.embedded_text {
        if key == SOFTWARE_KEYWORD || key.starts_with(RAW_PROFILE_PREFIX) {
            continue;
        }
        if !valid_keyword(key) {
            tracing::warn!(key = %key, "text key is not a valid PNG keyword, skipped");
            continue;
        }
        out.push(text_chunk(key, text));
    }
    let software = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    out.push(text_chunk(SOFTWARE_KEYWORD, &software));
    Ok(out)
}

fn save_png(image: &Image, path: &Path, mut progress: Progress<'_>) -> Result<(), CodecError> {
    let pixels = image.require_pixels()?;
    let options = PngSaveOptions::from_attributes(&image.attributes);
    let (width, height) = (pixels.width(), pixels.height());
    let keep_alpha = image.has_alpha;
    let out_channels = if keep_alpha { 4 } else { 3 };
    progress.report(0.1);

    let chunks = ancillary_chunks(image)?;
    let mut file = AtomicFile::create(path)?;
    {
        let mut out = BufWriter::new(file.file());
        let mut encoder = ::png::Encoder::new(&mut out, width, height);
        encoder.set_color(if keep_alpha {
            ::png::ColorType::Rgba
        } else {
            ::png::ColorType::Rgb
        });
        encoder.set_depth(if pixels.sixteen_bit() {
            ::png::BitDepth::Sixteen
        } else {
            ::png::BitDepth::Eight
        });
        let preset = zlib_level(options.compression_level);
        tracing::debug!(level = options.compression_level, ?preset, "PNG compression");
        encoder.set_compression(preset);

        let mut writer = encoder.write_header().map_err(encode_error)?;
        for (kind, body) in &chunks {
            writer
                .write_chunk(::png::chunk::ChunkType(*kind), body)
                .map_err(encode_error)?;
        }

        let mut stream = writer.stream_writer().map_err(encode_error)?;
        let row_samples = width as usize * CHANNELS;
        let mut checkpoints = progress.slice(height as usize, 0.1, 0.9);
        let mut row = Vec::with_capacity(width as usize * out_channels * 2);
        for y in 0..height as usize {
            progress.tick(&mut checkpoints, y)?;
            row.clear();
            match pixels.samples() {
                Samples::Eight(v) => {
                    for px in v[y * row_samples..(y + 1) * row_samples].chunks_exact(CHANNELS) {
                        row.extend_from_slice(&[px[2], px[1], px[0]]);
                        if keep_alpha {
                            row.push(px[3]);
                        }
                    }
                }
                Samples::Sixteen(v) => {
                    for px in v[y * row_samples..(y + 1) * row_samples].chunks_exact(CHANNELS) {
                        for c in [px[2], px[1], px[0]] {
                            row.extend_from_slice(&c.to_be_bytes());
                        }
                        if keep_alpha {
                            row.extend_from_slice(&px[3].to_be_bytes());
                        }
                    }
                }
            }
            stream.write_all(&row)?;
        }
        stream.finish().map_err(encode_error)?;
        writer.finish().map_err(encode_error)?;
        out.flush()?;
    }
    progress.report(0.95);
    file.commit()?;
    progress.finish();
    Ok(())
}

/// Number of checkpoints a PNG decode of `height` rows takes at `granularity`.
#[cfg(test)]
fn expected_polls(rows: usize, granularity: f32) -> usize {
    rows.div_ceil(super::calculations::granularity_step(rows, 0.7, Some(granularity)))
}
