//! Binary metadata blocks carried alongside the pixels.
//!
//! Adapters only move EXIF, IPTC and XMP blobs between containers and the
//! [`Image`](super::image::Image); interpretation goes through the
//! [`MetadataSource`] trait, implemented here with `kamadak-exif` for EXIF
//! and a small IPTC-IIM reader.
//!
//! | Container | EXIF | IPTC | XMP |
//! |---|---|---|---|
//! | PNG | `eXIf` chunk, "Raw profile type exif" text | "Raw profile type iptc" text | `XML:com.adobe.xmp` text |
//! | TIFF | (the file is EXIF) | tag 33723, tag 34377 (8BIM) | tag 700 |
//! | HEIF | `Exif` item | `mime` item | `mime` item |

use super::image::{Image, WorkingColorSpace, keys};
use super::loader::{CodecError, LoadFlags};
use exif::{In, Tag, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Raw metadata blobs. EXIF is stored as a bare TIFF structure, without the
/// `Exif\0\0` marker some containers prepend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBlocks {
    pub exif: Option<Vec<u8>>,
    pub iptc: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

impl MetadataBlocks {
    pub fn is_empty(&self) -> bool {
        self.exif.is_none() && self.iptc.is_none() && self.xmp.is_none()
    }

    pub fn set_exif(&mut self, data: &[u8]) {
        let data = strip_exif_marker(data);
        if !data.is_empty() {
            self.exif = Some(data.to_vec());
        }
    }

    pub fn set_iptc(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.iptc = Some(data.to_vec());
        }
    }

    pub fn set_xmp(&mut self, data: &[u8]) {
        let trimmed = trim_trailing_nul(data);
        if !trimmed.is_empty() {
            self.xmp = Some(trimmed.to_vec());
        }
    }
}

/// Read access to image metadata, as the adapters consume it.
pub trait MetadataSource {
    fn exif_encoded(&self) -> Option<&[u8]>;
    fn iptc(&self) -> Option<&[u8]>;
    fn xmp(&self) -> Option<&[u8]>;

    fn has_exif(&self) -> bool {
        self.exif_encoded().is_some()
    }

    fn has_iptc(&self) -> bool {
        self.iptc().is_some()
    }

    fn has_xmp(&self) -> bool {
        self.xmp().is_some()
    }

    /// Text value of a primary-IFD EXIF tag.
    fn exif_tag_string(&self, tag: Tag) -> Option<String>;

    /// Raw bytes of a byte/undefined/ASCII EXIF tag.
    fn exif_tag_data(&self, tag: Tag) -> Option<Vec<u8>>;

    /// Signed decimal degrees, south negative.
    fn gps_latitude(&self) -> Option<f64>;

    /// Signed decimal degrees, west negative.
    fn gps_longitude(&self) -> Option<f64>;

    /// Capture time in EXIF `YYYY:MM:DD HH:MM:SS` form.
    fn item_date_time(&self) -> Option<String>;

    /// Working color space declared by EXIF, for files without an ICC profile.
    fn read_color_profile(&self) -> Option<WorkingColorSpace>;

    /// Human-readable tags: `title`, `caption`, `keywords`, `description`.
    fn read_text_tags(&self) -> BTreeMap<String, String>;
}

impl MetadataSource for MetadataBlocks {
    fn exif_encoded(&self) -> Option<&[u8]> {
        self.exif.as_deref()
    }

    fn iptc(&self) -> Option<&[u8]> {
        self.iptc.as_deref()
    }

    fn xmp(&self) -> Option<&[u8]> {
        self.xmp.as_deref()
    }

    fn exif_tag_string(&self, tag: Tag) -> Option<String> {
        let exif = self.parsed_exif()?;
        let field = exif.get_field(tag, In::PRIMARY)?;
        match &field.value {
            Value::Ascii(parts) => {
                let text = parts
                    .iter()
                    .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                let text = text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            _ => Some(field.display_value().to_string()),
        }
    }

    fn exif_tag_data(&self, tag: Tag) -> Option<Vec<u8>> {
        let exif = self.parsed_exif()?;
        let field = exif.get_field(tag, In::PRIMARY)?;
        match &field.value {
            Value::Byte(v) | Value::Undefined(v, _) => Some(v.clone()),
            Value::Ascii(parts) => Some(parts.concat()),
            _ => None,
        }
    }

    fn gps_latitude(&self) -> Option<f64> {
        self.gps_coordinate(Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S')
    }

    fn gps_longitude(&self) -> Option<f64> {
        self.gps_coordinate(Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W')
    }

    fn item_date_time(&self) -> Option<String> {
        [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
            .into_iter()
            .find_map(|tag| self.exif_tag_string(tag))
    }

    fn read_color_profile(&self) -> Option<WorkingColorSpace> {
        let exif = self.parsed_exif()?;
        let color_space = exif
            .get_field(Tag::ColorSpace, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        match color_space {
            Some(1) => return Some(WorkingColorSpace::Srgb),
            Some(2) => return Some(WorkingColorSpace::AdobeRgb),
            _ => {}
        }
        match self.exif_tag_string(Tag::InteroperabilityIndex).as_deref() {
            Some("R03") => Some(WorkingColorSpace::AdobeRgb),
            Some("R98") => Some(WorkingColorSpace::Srgb),
            _ => None,
        }
    }

    fn read_text_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if let Some(iim) = self.iptc() {
            let iptc = IptcData::from_iim(iim);
            if let Some(title) = iptc.object_name {
                tags.insert("title".to_string(), title);
            }
            if let Some(caption) = iptc.caption {
                tags.insert("caption".to_string(), caption);
            }
            if !iptc.keywords.is_empty() {
                tags.insert("keywords".to_string(), iptc.keywords.join(", "));
            }
        }
        if let Some(description) = self.exif_tag_string(Tag::ImageDescription) {
            tags.insert("description".to_string(), description);
        }
        tags
    }
}

impl MetadataBlocks {
    fn parsed_exif(&self) -> Option<exif::Exif> {
        let data = self.exif.as_ref()?;
        match exif::Reader::new().read_raw(data.clone()) {
            Ok(exif) => Some(exif),
            Err(e) => {
                tracing::debug!(error = %e, "unreadable EXIF block");
                None
            }
        }
    }

    fn gps_coordinate(&self, value_tag: Tag, ref_tag: Tag, negative: char) -> Option<f64> {
        let exif = self.parsed_exif()?;
        let field = exif.get_field(value_tag, In::PRIMARY)?;
        let Value::Rational(parts) = &field.value else {
            return None;
        };
        let degrees = parts.first()?.to_f64();
        let minutes = parts.get(1).map(|r| r.to_f64()).unwrap_or(0.0);
        let seconds = parts.get(2).map(|r| r.to_f64()).unwrap_or(0.0);
        let value = degrees + minutes / 60.0 + seconds / 3600.0;
        let reference = self.exif_tag_string(ref_tag).unwrap_or_default();
        if reference.starts_with(negative) {
            Some(-value)
        } else {
            Some(value)
        }
    }
}

fn strip_exif_marker(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"Exif\0\0").unwrap_or(data)
}

fn trim_trailing_nul(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &data[..end]
}

// ---------------------------------------------------------------------------
// ImageMagick "Raw profile type" text encoding
// ---------------------------------------------------------------------------

/// Prefix of text keys that carry hex-encoded binary profiles.
pub const RAW_PROFILE_PREFIX: &str = "Raw profile type ";

/// Decode the body of a "Raw profile type" text entry.
///
/// Layout: `\n<name>\n<decimal length>\n<hex digits, wrapped>`.
pub fn decode_raw_profile(text: &str) -> Option<Vec<u8>> {
    let mut tokens = text.split_whitespace();
    let _name = tokens.next()?;
    let length: usize = tokens.next()?.parse().ok()?;
    let digits: Vec<u8> = tokens.flat_map(|t| t.bytes()).collect();
    if digits.len() < length * 2 {
        return None;
    }
    let mut out = Vec::with_capacity(length);
    for pair in digits.chunks_exact(2).take(length) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// Encode `data` as a "Raw profile type" text body.
pub fn encode_raw_profile(name: &str, data: &[u8]) -> String {
    let mut text = format!("\n{name}\n{:8}\n", data.len());
    for line in data.chunks(36) {
        for byte in line {
            text.push_str(&format!("{byte:02x}"));
        }
        text.push('\n');
    }
    text
}

// ---------------------------------------------------------------------------
// IPTC-IIM
// ---------------------------------------------------------------------------

/// Tag marker that opens every IIM dataset.
const IIM_MARKER: u8 = 0x1C;
/// Envelope record dataset declaring the coded character set.
const CODED_CHARACTER_SET: (u8, u8) = (1, 90);
/// ISO 2022 escape for UTF-8.
const UTF8_ESCAPE: &[u8] = b"\x1b%G";

/// One IIM dataset borrowed from its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IptcDataset<'a> {
    pub record: u8,
    pub dataset: u8,
    pub data: &'a [u8],
}

/// Iterator over the datasets of an IPTC-IIM block.
///
/// Stops at the first byte that is not a tag marker or at a dataset whose
/// declared length runs past the block.
pub struct IptcDatasets<'a> {
    data: &'a [u8],
}

impl<'a> IptcDatasets<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for IptcDatasets<'a> {
    type Item = IptcDataset<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;
        let [IIM_MARKER, record, dataset, hi, lo, rest @ ..] = data else {
            self.data = &[];
            return None;
        };
        let declared = u16::from_be_bytes([*hi, *lo]);
        // Extended datasets: the low 15 bits give the size of the length field.
        let (len, rest) = if declared & 0x8000 == 0 {
            (declared as usize, rest)
        } else {
            let width = (declared & 0x7FFF) as usize;
            let Some(field) = rest.get(..width).filter(|f| f.len() <= 8) else {
                self.data = &[];
                return None;
            };
            let len = field.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            (usize::try_from(len).unwrap_or(usize::MAX), &rest[width..])
        };
        let Some(data) = rest.get(..len) else {
            self.data = &[];
            return None;
        };
        self.data = &rest[len..];
        Some(IptcDataset {
            record: *record,
            dataset: *dataset,
            data,
        })
    }
}

/// The application-record fields surfaced as text tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IptcData {
    pub object_name: Option<String>,
    pub caption: Option<String>,
    pub keywords: Vec<String>,
}

impl IptcData {
    /// Collect object name (2:5), keywords (2:25) and caption (2:120).
    ///
    /// Text is UTF-8 when the envelope declares it or when it decodes
    /// cleanly, Latin-1 otherwise.
    pub fn from_iim(data: &[u8]) -> Self {
        let utf8_declared = IptcDatasets::new(data)
            .any(|d| (d.record, d.dataset) == CODED_CHARACTER_SET && d.data == UTF8_ESCAPE);
        let mut out = Self::default();
        for d in IptcDatasets::new(data).filter(|d| d.record == 2) {
            let text = iim_text(d.data, utf8_declared);
            if text.is_empty() {
                continue;
            }
            match d.dataset {
                5 => out.object_name = Some(text),
                25 => out.keywords.push(text),
                120 => out.caption = Some(text),
                _ => {}
            }
        }
        out
    }
}

fn iim_text(data: &[u8], utf8_declared: bool) -> String {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) if utf8_declared => String::from_utf8_lossy(data).into_owned(),
        Err(_) => data.iter().map(|&b| b as char).collect(),
    };
    text.trim().to_string()
}

const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_TYPE: &[u8; 4] = b"8BIM";
const IPTC_RESOURCE: u16 = 0x0404;

/// Iterator over `(id, payload)` of the 8BIM image resources in a
/// Photoshop block, with or without its signature.
pub struct PhotoshopResources<'a> {
    data: &'a [u8],
}

impl<'a> PhotoshopResources<'a> {
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            data: block.strip_prefix(PHOTOSHOP_SIGNATURE).unwrap_or(block),
        }
    }
}

impl<'a> Iterator for PhotoshopResources<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        match next_resource(self.data) {
            Some((id, payload, rest)) => {
                self.data = rest;
                Some((id, payload))
            }
            None => {
                self.data = &[];
                None
            }
        }
    }
}

/// Split one resource off the front of `data`: id, payload, remainder.
fn next_resource(data: &[u8]) -> Option<(u16, &[u8], &[u8])> {
    let rest = data.strip_prefix(RESOURCE_TYPE)?;
    let id = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]);
    // Pascal name including its length byte, padded to even.
    let name = 1 + *rest.get(2)? as usize;
    let rest = rest.get(2 + name + name % 2..)?;
    let len = u32::from_be_bytes(rest.get(..4)?.try_into().ok()?) as usize;
    let payload = rest.get(4..4usize.checked_add(len)?)?;
    let next = rest.get(4 + len + len % 2..).unwrap_or(&[]);
    Some((id, payload, next))
}

/// The IPTC-IIM resource of a Photoshop block.
pub fn iptc_from_photoshop(block: &[u8]) -> Option<&[u8]> {
    PhotoshopResources::new(block)
        .find(|&(id, _)| id == IPTC_RESOURCE)
        .map(|(_, payload)| payload)
}

/// IPTC-IIM bytes as a single unnamed 8BIM resource (TIFF tag 34377).
pub fn iptc_as_photoshop_resource(iim: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(iim.len() + 13);
    out.extend_from_slice(RESOURCE_TYPE);
    out.extend_from_slice(&IPTC_RESOURCE.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(iim.len() as u32).to_be_bytes());
    out.extend_from_slice(iim);
    if iim.len() % 2 == 1 {
        out.push(0);
    }
    out
}

// ---------------------------------------------------------------------------
// Image history and unique hash
// ---------------------------------------------------------------------------

/// Extract the edit history recorded in an XMP packet.
pub fn image_history_from_xmp(xmp: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(xmp);
    let open = "<digiKam:history>";
    if let Some(start) = text.find(open) {
        let rest = &text[start + open.len()..];
        let end = rest.find("</digiKam:history>")?;
        return Some(rest[..end].trim().to_string()).filter(|s| !s.is_empty());
    }
    let attr = "digiKam:history=\"";
    let start = text.find(attr)? + attr.len();
    let end = text[start..].find('"')?;
    Some(text[start..start + end].to_string()).filter(|s| !s.is_empty())
}

const HASH_WINDOW: u64 = 100 * 1024;

/// Content hash over the first and last 100 KiB plus the file size.
///
/// Files up to twice the window are hashed whole.
pub fn unique_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();

    if size <= 2 * HASH_WINDOW {
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)?;
        hasher.update(&data);
    } else {
        let mut window = vec![0u8; HASH_WINDOW as usize];
        file.read_exact(&mut window)?;
        hasher.update(&window);
        file.seek(SeekFrom::End(-(HASH_WINDOW as i64)))?;
        file.read_exact(&mut window)?;
        hasher.update(&window);
    }
    hasher.update(size.to_string().as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Apply the flag-driven extras every adapter shares once decoding is done.
///
/// The EXIF color space only fills in when no ICC profile was found.
pub(crate) fn attach_to_image(
    image: &mut Image,
    path: &Path,
    flags: LoadFlags,
    blocks: MetadataBlocks,
) -> Result<(), CodecError> {
    if image.icc_profile.is_none() && flags.contains(LoadFlags::ICC_PROFILE) {
        image.working_space = blocks.read_color_profile();
    }
    if flags.contains(LoadFlags::IMAGE_HISTORY) {
        if let Some(history) = blocks.xmp().and_then(image_history_from_xmp) {
            image.attributes.set(keys::IMAGE_HISTORY, history);
        }
    }
    if flags.contains(LoadFlags::METADATA) {
        image.metadata = blocks;
    }
    if flags.contains(LoadFlags::UNIQUE_HASH) {
        image.attributes.set(keys::UNIQUE_HASH, unique_hash(path)?);
    }
    Ok(())
}
