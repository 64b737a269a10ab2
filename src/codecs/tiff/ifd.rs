//! TIFF container plumbing: header and IFD parsing, plus a little-endian
//! directory writer used by the encoder and the EXIF extractor.
//!
//! Entry values are resolved eagerly into owned byte vectors in file byte
//! order; typed accessors convert on demand.

use super::super::loader::CodecError;
use std::collections::{BTreeMap, BTreeSet};

pub mod tag {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const DOCUMENT_NAME: u16 = 269;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const MAKE: u16 = 271;
    pub const MODEL: u16 = 272;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const ORIENTATION: u16 = 274;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const X_RESOLUTION: u16 = 282;
    pub const Y_RESOLUTION: u16 = 283;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const RESOLUTION_UNIT: u16 = 296;
    pub const SOFTWARE: u16 = 305;
    pub const DATE_TIME: u16 = 306;
    pub const ARTIST: u16 = 315;
    pub const PREDICTOR: u16 = 317;
    pub const COLOR_MAP: u16 = 320;
    pub const TILE_WIDTH: u16 = 322;
    pub const EXTRA_SAMPLES: u16 = 338;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const YCBCR_SUBSAMPLING: u16 = 530;
    pub const XMP: u16 = 700;
    pub const COPYRIGHT: u16 = 33432;
    pub const IPTC: u16 = 33723;
    pub const PHOTOSHOP: u16 = 34377;
    pub const EXIF_IFD: u16 = 34665;
    pub const ICC_PROFILE: u16 = 34675;
    pub const GPS_IFD: u16 = 34853;
}

/// Field types from the TIFF 6.0 table.
pub mod field {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const UNDEFINED: u16 = 7;
    pub const IFD: u16 = 13;
}

fn field_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// Element width used when swapping a value between byte orders.
fn swap_unit(field_type: u16) -> usize {
    match field_type {
        5 | 10 => 4,
        other => field_size(other).unwrap_or(1),
    }
}

const MAX_IFDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let b = [b[0], b[1]];
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let b = [b[0], b[1], b[2], b[3]];
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub field_type: u16,
    pub count: u32,
    /// Value bytes in file byte order.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Ifd {
    order: ByteOrder,
    entries: BTreeMap<u16, Entry>,
}

impl Ifd {
    pub fn entry(&self, tag: u16) -> Option<&Entry> {
        self.entries.get(&tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = (u16, &Entry)> {
        self.entries.iter().map(|(&t, e)| (t, e))
    }

    /// Unsigned integer values of a BYTE, SHORT, LONG or IFD entry.
    pub fn values(&self, tag: u16) -> Option<Vec<u32>> {
        let e = self.entries.get(&tag)?;
        let out = match e.field_type {
            field::BYTE | field::UNDEFINED => e.data.iter().map(|&b| b as u32).collect(),
            field::SHORT => e.data.chunks_exact(2).map(|c| self.order.u16(c) as u32).collect(),
            field::LONG | field::IFD => e.data.chunks_exact(4).map(|c| self.order.u32(c)).collect(),
            _ => return None,
        };
        Some(out)
    }

    pub fn value(&self, tag: u16) -> Option<u32> {
        self.values(tag)?.first().copied()
    }

    pub fn value_or(&self, tag: u16, default: u32) -> u32 {
        self.value(tag).unwrap_or(default)
    }

    pub fn bytes(&self, tag: u16) -> Option<&[u8]> {
        self.entries.get(&tag).map(|e| e.data.as_slice())
    }

    /// ASCII value up to the first NUL, trimmed; `None` when empty.
    pub fn ascii(&self, tag: u16) -> Option<String> {
        let e = self.entries.get(&tag)?;
        if e.field_type != field::ASCII {
            return None;
        }
        let end = e.data.iter().position(|&b| b == 0).unwrap_or(e.data.len());
        let text = String::from_utf8_lossy(&e.data[..end]).trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    /// The entry's value re-encoded little-endian, for copying into a new
    /// directory.
    pub fn little_endian(&self, tag: u16) -> Option<(u16, u32, Vec<u8>)> {
        let e = self.entries.get(&tag)?;
        let mut data = e.data.clone();
        if self.order == ByteOrder::Big {
            let unit = swap_unit(e.field_type);
            if unit > 1 {
                data.chunks_exact_mut(unit).for_each(|c| c.reverse());
            }
        }
        Some((e.field_type, e.count, data))
    }
}

/// A parsed TIFF file: byte order plus the chain of top-level directories.
#[derive(Debug)]
pub struct TiffFile<'a> {
    pub data: &'a [u8],
    pub order: ByteOrder,
    pub ifds: Vec<Ifd>,
}

pub fn is_tiff(data: &[u8]) -> bool {
    data.starts_with(b"II*\0") || data.starts_with(b"MM\0*")
}

impl<'a> TiffFile<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        let order = match data.get(..4) {
            Some(b"II*\0") => ByteOrder::Little,
            Some(b"MM\0*") => ByteOrder::Big,
            _ => return Err(CodecError::Rejected("missing TIFF header".into())),
        };
        let mut ifds = Vec::new();
        let mut seen = BTreeSet::new();
        let first = data
            .get(4..8)
            .ok_or_else(|| CodecError::Rejected("TIFF header is truncated".into()))?;
        let mut offset = order.u32(first) as usize;
        while offset != 0 && ifds.len() < MAX_IFDS && seen.insert(offset) {
            let (ifd, next) = read_ifd(data, order, offset)?;
            ifds.push(ifd);
            offset = next;
        }
        if ifds.is_empty() {
            return Err(CodecError::Rejected("TIFF has no image directory".into()));
        }
        Ok(Self { data, order, ifds })
    }

    /// Read a sub-directory (Exif, GPS) at `offset`.
    pub fn sub_ifd(&self, offset: u32) -> Option<Ifd> {
        read_ifd(self.data, self.order, offset as usize).ok().map(|(ifd, _)| ifd)
    }

    /// Bytes at `offset..offset+len`, bounds-checked.
    pub fn slice(&self, offset: u32, len: u32) -> Option<&'a [u8]> {
        let start = offset as usize;
        self.data.get(start..start.checked_add(len as usize)?)
    }
}

fn read_ifd(data: &[u8], order: ByteOrder, offset: usize) -> Result<(Ifd, usize), CodecError> {
    let truncated = || CodecError::Rejected(format!("TIFF directory at {offset} is truncated"));
    let count = order.u16(data.get(offset..offset + 2).ok_or_else(truncated)?) as usize;
    let entries_end = offset + 2 + count * 12;
    let next = data.get(entries_end..entries_end + 4).ok_or_else(truncated)?;
    let next = order.u32(next) as usize;

    let mut entries = BTreeMap::new();
    for i in 0..count {
        let at = offset + 2 + i * 12;
        let raw = &data[at..at + 12];
        let tag = order.u16(&raw[0..2]);
        let field_type = order.u16(&raw[2..4]);
        let count = order.u32(&raw[4..8]);
        let Some(size) = field_size(field_type) else {
            tracing::warn!(tag, field_type, "unknown TIFF field type, entry skipped");
            continue;
        };
        let Some(len) = (count as usize).checked_mul(size) else {
            continue;
        };
        let value = if len <= 4 {
            raw[8..8 + len].to_vec()
        } else {
            let start = order.u32(&raw[8..12]) as usize;
            match start.checked_add(len).and_then(|end| data.get(start..end)) {
                Some(v) => v.to_vec(),
                None => {
                    tracing::warn!(tag, "TIFF entry points past end of file, skipped");
                    continue;
                }
            }
        };
        entries.insert(
            tag,
            Entry {
                field_type,
                count,
                data: value,
            },
        );
    }
    Ok((Ifd { order, entries }, next))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Entries of one directory to be written little-endian.
#[derive(Debug, Default, Clone)]
pub struct IfdBuilder {
    entries: BTreeMap<u16, (u16, u32, Vec<u8>)>,
}

impl IfdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&mut self, tag: u16, field_type: u16, count: u32, data: Vec<u8>) -> &mut Self {
        self.entries.insert(tag, (field_type, count, data));
        self
    }

    pub fn short(&mut self, tag: u16, values: &[u16]) -> &mut Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.raw(tag, field::SHORT, values.len() as u32, data)
    }

    pub fn long(&mut self, tag: u16, values: &[u32]) -> &mut Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.raw(tag, field::LONG, values.len() as u32, data)
    }

    pub fn rational(&mut self, tag: u16, numerator: u32, denominator: u32) -> &mut Self {
        let mut data = numerator.to_le_bytes().to_vec();
        data.extend_from_slice(&denominator.to_le_bytes());
        self.raw(tag, field::RATIONAL, 1, data)
    }

    pub fn ascii(&mut self, tag: u16, text: &str) -> &mut Self {
        let mut data: Vec<u8> = text.bytes().filter(|&b| b != 0).collect();
        data.push(0);
        let count = data.len() as u32;
        self.raw(tag, field::ASCII, count, data)
    }

    pub fn undefined(&mut self, tag: u16, data: &[u8]) -> &mut Self {
        self.raw(tag, field::UNDEFINED, data.len() as u32, data.to_vec())
    }

    pub fn byte(&mut self, tag: u16, data: &[u8]) -> &mut Self {
        self.raw(tag, field::BYTE, data.len() as u32, data.to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory little-endian TIFF under construction.
#[derive(Debug)]
pub struct TiffBuilder {
    out: Vec<u8>,
    /// Position of the next-IFD pointer to patch when another top-level
    /// directory is appended.
    link: usize,
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            out: b"II*\0\0\0\0\0".to_vec(),
            link: 4,
        }
    }

    fn align(&mut self) {
        if self.out.len() % 2 == 1 {
            self.out.push(0);
        }
    }

    fn offset(&self) -> Result<u32, CodecError> {
        u32::try_from(self.out.len())
            .map_err(|_| CodecError::Encode("TIFF output exceeds 4 GiB".into()))
    }

    /// Append raw data (strips, thumbnails) and return its offset.
    pub fn append(&mut self, data: &[u8]) -> Result<u32, CodecError> {
        self.align();
        let at = self.offset()?;
        self.out.extend_from_slice(data);
        Ok(at)
    }

    /// Write a directory and chain it after the previous top-level one.
    pub fn push_ifd(&mut self, ifd: &IfdBuilder) -> Result<u32, CodecError> {
        let at = self.write_ifd(ifd)?;
        let link = self.link;
        self.out[link..link + 4].copy_from_slice(&at.to_le_bytes());
        self.link = at as usize + 2 + ifd.entries.len() * 12;
        Ok(at)
    }

    /// Write a directory that is only reachable through a pointer tag.
    pub fn write_ifd(&mut self, ifd: &IfdBuilder) -> Result<u32, CodecError> {
        self.align();
        let at = self.offset()?;
        let n = ifd.entries.len();
        let mut extra_at = at as usize + 2 + n * 12 + 4;
        let mut table = Vec::with_capacity(2 + n * 12 + 4);
        let mut extra = Vec::new();
        table.extend_from_slice(&(n as u16).to_le_bytes());
        for (&tag, (field_type, count, data)) in &ifd.entries {
            table.extend_from_slice(&tag.to_le_bytes());
            table.extend_from_slice(&field_type.to_le_bytes());
            table.extend_from_slice(&count.to_le_bytes());
            if data.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..data.len()].copy_from_slice(data);
                table.extend_from_slice(&inline);
            } else {
                let value_at = u32::try_from(extra_at)
                    .map_err(|_| CodecError::Encode("TIFF output exceeds 4 GiB".into()))?;
                table.extend_from_slice(&value_at.to_le_bytes());
                extra.extend_from_slice(data);
                if data.len() % 2 == 1 {
                    extra.push(0);
                }
                extra_at += data.len() + data.len() % 2;
            }
        }
        table.extend_from_slice(&0u32.to_le_bytes());
        self.out.extend_from_slice(&table);
        self.out.extend_from_slice(&extra);
        Ok(at)
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

// ---------------------------------------------------------------------------
// EXIF sub-directories
// ---------------------------------------------------------------------------

/// Interoperability pointer inside the Exif directory.
const INTEROP_IFD: u16 = 0xA005;

/// Tags of the first directory that also belong in an EXIF block.
const EXIF_PRIMARY_TAGS: [u16; 9] = [
    tag::IMAGE_DESCRIPTION,
    tag::MAKE,
    tag::MODEL,
    tag::ORIENTATION,
    tag::SOFTWARE,
    tag::DATE_TIME,
    tag::ARTIST,
    tag::COPYRIGHT,
    tag::RESOLUTION_UNIT,
];

/// Owned copy of a sub-directory, minus entries that point elsewhere in
/// the source file.
fn copy_directory(ifd: &Ifd) -> IfdBuilder {
    let mut out = IfdBuilder::new();
    for (t, entry) in ifd.tags() {
        if entry.field_type == field::IFD || matches!(t, tag::EXIF_IFD | tag::GPS_IFD | INTEROP_IFD) {
            continue;
        }
        if let Some((field_type, count, data)) = ifd.little_endian(t) {
            out.raw(t, field_type, count, data);
        }
    }
    out
}

/// Rewrite the Exif and GPS sub-directories of `file`'s first directory
/// into `out` and point `top` at them. Returns false when there were none.
pub fn copy_sub_directories(
    file: &TiffFile<'_>,
    out: &mut TiffBuilder,
    top: &mut IfdBuilder,
) -> Result<bool, CodecError> {
    let Some(primary) = file.ifds.first() else {
        return Ok(false);
    };
    let mut copied = false;
    for pointer in [tag::EXIF_IFD, tag::GPS_IFD] {
        let Some(ifd) = primary.value(pointer).and_then(|off| file.sub_ifd(off)) else {
            continue;
        };
        let at = out.write_ifd(&copy_directory(&ifd))?;
        top.long(pointer, &[at]);
        copied = true;
    }
    Ok(copied)
}

/// Standalone EXIF structure rebuilt from `file`: the descriptive tags of
/// the first directory plus its Exif and GPS sub-directories.
///
/// Decoded pixels are always returned upright, so a stored Orientation is
/// written back as 1.
pub fn exif_block(file: &TiffFile<'_>) -> Option<Vec<u8>> {
    let primary = file.ifds.first()?;
    let mut builder = TiffBuilder::new();
    let mut top = IfdBuilder::new();
    if !copy_sub_directories(file, &mut builder, &mut top).ok()? {
        return None;
    }
    for t in EXIF_PRIMARY_TAGS {
        if t == tag::ORIENTATION {
            if primary.entry(t).is_some() {
                top.short(t, &[1]);
            }
        } else if let Some((field_type, count, data)) = primary.little_endian(t) {
            top.raw(t, field_type, count, data);
        }
    }
    builder.push_ifd(&top).ok()?;
    Some(builder.finish())
}
