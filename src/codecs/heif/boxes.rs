//! ISOBMFF box walking for HEIF containers.
//!
//! Enough of `ftyp` and `meta` is understood to answer header questions
//! without an HEVC engine: primary item geometry and bit depth, alpha
//! presence, thumbnails, color profile, and the EXIF/XMP items.

use super::super::loader::CodecError;
use std::collections::BTreeMap;

/// Brands accepted at bytes 8-11.
pub const BRANDS: [&[u8; 4]; 7] = [b"heic", b"heix", b"mif1", b"msf1", b"heim", b"heis", b"hevc"];

pub fn is_heif(data: &[u8]) -> bool {
    data.get(4..8) == Some(&b"ftyp"[..])
        && data
            .get(8..12)
            .is_some_and(|b| BRANDS.iter().any(|brand| b == *brand))
}

// ---------------------------------------------------------------------------
// Byte reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

fn truncated(what: &str) -> CodecError {
    CodecError::Rejected(format!("HEIF {what} box is truncated"))
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.data.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            let mut a = [0u8; 8];
            a.copy_from_slice(b);
            u64::from_be_bytes(a)
        })
    }

    /// Unsigned integer of `size` bytes (0, 4 or 8).
    fn sized(&mut self, size: u8) -> Option<u64> {
        match size {
            0 => Some(0),
            4 => self.u32().map(u64::from),
            8 => self.u64(),
            _ => None,
        }
    }

    fn fourcc(&mut self) -> Option<[u8; 4]> {
        self.take(4).map(|b| [b[0], b[1], b[2], b[3]])
    }

    /// NUL-terminated UTF-8 string.
    fn cstr(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Some(s)
    }

    /// Version and flags of a full box.
    fn full_box(&mut self) -> Option<(u8, u32)> {
        let v = self.u32()?;
        Some(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }
}

/// Iterate `(type, body)` over consecutive boxes in `data`.
fn boxes(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut r = Reader::new(data);
    std::iter::from_fn(move || {
        let start = r.pos;
        let size = r.u32()? as u64;
        let kind = r.fourcc()?;
        let size = match size {
            1 => r.u64()?,
            0 => (data.len() - start) as u64,
            s => s,
        };
        let header = r.pos - start;
        let end = start.checked_add(usize::try_from(size).ok()?)?;
        if end > data.len() || end < start + header {
            return None;
        }
        let body = &data[r.pos..end];
        r.pos = end;
        Some((kind, body))
    })
}

fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    boxes(data).find(|(k, _)| k == kind).map(|(_, b)| b)
}

// ---------------------------------------------------------------------------
// Parsed structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorInfo {
    Icc(Vec<u8>),
    Nclx {
        primaries: u16,
        transfer: u16,
        matrix: u16,
        full_range: bool,
    },
}

/// What the container says about one image item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: u32,
    pub item_type: String,
    pub width: u32,
    pub height: u32,
    pub luma_bits: Option<u8>,
    pub chroma_bits: Option<u8>,
    pub chroma_format: Option<u8>,
    pub has_alpha: bool,
    /// Quarter turns anticlockwise from `irot`.
    pub rotation: u8,
}

impl ItemInfo {
    /// Display size after `irot`.
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation % 2 == 1 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Bits per channel for the canonical buffer decision: `pixi`, else
    /// `hvcC` luma depth, else 8.
    pub fn bit_depth(&self) -> u8 {
        self.luma_bits.unwrap_or(8)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeifInfo {
    pub brand: [u8; 4],
    pub primary: ItemInfo,
    pub thumbnails: Vec<ItemInfo>,
    pub color: Option<ColorInfo>,
    pub exif: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Infe {
    item_type: [u8; 4],
    content_type: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct Location {
    construction: u8,
    extents: Vec<(u64, u64)>,
}

#[derive(Debug)]
enum Property {
    Ispe(u32, u32),
    HvcC { luma: u8, chroma: u8, format: u8 },
    Pixi(Vec<u8>),
    Colr(ColorInfo),
    AuxC(String),
    Irot(u8),
    Other,
}

fn parse_property(kind: &[u8; 4], body: &[u8]) -> Property {
    let mut r = Reader::new(body);
    let parsed = match kind {
        b"ispe" => (|| {
            r.full_box()?;
            Some(Property::Ispe(r.u32()?, r.u32()?))
        })(),
        b"hvcC" => body.get(16..19).map(|b| Property::HvcC {
            format: b[0] & 0x03,
            luma: (b[1] & 0x07) + 8,
            chroma: (b[2] & 0x07) + 8,
        }),
        b"pixi" => (|| {
            r.full_box()?;
            let n = r.u8()? as usize;
            Some(Property::Pixi(r.take(n)?.to_vec()))
        })(),
        b"colr" => (|| {
            let kind = r.fourcc()?;
            match &kind {
                b"prof" | b"rICC" => Some(Property::Colr(ColorInfo::Icc(r.rest().to_vec()))),
                b"nclx" => Some(Property::Colr(ColorInfo::Nclx {
                    primaries: r.u16()?,
                    transfer: r.u16()?,
                    matrix: r.u16()?,
                    full_range: r.u8()? & 0x80 != 0,
                })),
                _ => None,
            }
        })(),
        b"auxC" => (|| {
            r.full_box()?;
            Some(Property::AuxC(r.cstr()?))
        })(),
        b"irot" => r.u8().map(|b| Property::Irot(b & 0x03)),
        _ => None,
    };
    parsed.unwrap_or(Property::Other)
}

fn is_alpha_aux(urn: &str) -> bool {
    urn == "urn:mpeg:hevc:2015:auxid:1" || urn == "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha"
}

fn parse_iinf(body: &[u8]) -> Result<BTreeMap<u32, Infe>, CodecError> {
    let mut r = Reader::new(body);
    let (version, _) = r.full_box().ok_or_else(|| truncated("iinf"))?;
    let count = if version == 0 { r.u16().map(u32::from) } else { r.u32() };
    count.ok_or_else(|| truncated("iinf"))?;
    let mut items = BTreeMap::new();
    for (kind, infe) in boxes(r.rest()) {
        if &kind != b"infe" {
            continue;
        }
        let mut r = Reader::new(infe);
        let Some((version, _)) = r.full_box() else { continue };
        if version < 2 {
            continue;
        }
        let id = if version == 2 { r.u16().map(u32::from) } else { r.u32() };
        let parsed = (|| {
            let id = id?;
            r.u16()?;
            let item_type = r.fourcc()?;
            r.cstr()?;
            let content_type = if &item_type == b"mime" { r.cstr() } else { None };
            Some((id, Infe { item_type, content_type }))
        })();
        if let Some((id, infe)) = parsed {
            items.insert(id, infe);
        }
    }
    Ok(items)
}

fn parse_iloc(body: &[u8]) -> Result<BTreeMap<u32, Location>, CodecError> {
    let short = || truncated("iloc");
    let mut r = Reader::new(body);
    let (version, _) = r.full_box().ok_or_else(short)?;
    let sizes = r.u16().ok_or_else(short)?;
    let offset_size = (sizes >> 12) as u8;
    let length_size = ((sizes >> 8) & 0xF) as u8;
    let base_size = ((sizes >> 4) & 0xF) as u8;
    let index_size = if version >= 1 { (sizes & 0xF) as u8 } else { 0 };
    let id = |r: &mut Reader<'_>| if version < 2 { r.u16().map(u32::from) } else { r.u32() };
    let count = id(&mut r).ok_or_else(short)?;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        let item = id(&mut r).ok_or_else(short)?;
        let construction = if version >= 1 {
            (r.u16().ok_or_else(short)? & 0xF) as u8
        } else {
            0
        };
        r.u16().ok_or_else(short)?;
        let base = r.sized(base_size).ok_or_else(short)?;
        let extents = r.u16().ok_or_else(short)?;
        let mut loc = Location {
            construction,
            extents: Vec::with_capacity(extents as usize),
        };
        for _ in 0..extents {
            r.sized(index_size).ok_or_else(short)?;
            let offset = r.sized(offset_size).ok_or_else(short)?;
            let length = r.sized(length_size).ok_or_else(short)?;
            let start = base.checked_add(offset).ok_or_else(|| {
                CodecError::Rejected(format!("iloc extent of item {item} overflows"))
            })?;
            loc.extents.push((start, length));
        }
        out.insert(item, loc);
    }
    Ok(out)
}

/// `iref` references as (type, from, to).
fn parse_iref(body: &[u8]) -> Vec<([u8; 4], u32, u32)> {
    let mut r = Reader::new(body);
    let Some((version, _)) = r.full_box() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (kind, reference) in boxes(r.rest()) {
        let mut r = Reader::new(reference);
        let id = |r: &mut Reader<'_>| if version == 0 { r.u16().map(u32::from) } else { r.u32() };
        let Some(from) = id(&mut r) else { continue };
        let Some(count) = r.u16() else { continue };
        for _ in 0..count {
            if let Some(to) = id(&mut r) {
                out.push((kind, from, to));
            }
        }
    }
    out
}

/// Property indices (1-based) associated with each item.
fn parse_ipma(body: &[u8]) -> Option<BTreeMap<u32, Vec<usize>>> {
    let mut r = Reader::new(body);
    let (version, flags) = r.full_box()?;
    let count = r.u32()?;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        let id = if version < 1 { r.u16().map(u32::from)? } else { r.u32()? };
        let n = r.u8()?;
        let mut props = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let index = if flags & 1 == 1 {
                (r.u16()? & 0x7FFF) as usize
            } else {
                (r.u8()? & 0x7F) as usize
            };
            props.push(index);
        }
        out.insert(id, props);
    }
    Some(out)
}

fn item_data(file: &[u8], idat: Option<&[u8]>, loc: &Location) -> Option<Vec<u8>> {
    let source = match loc.construction {
        0 => file,
        1 => idat?,
        _ => return None,
    };
    let mut out = Vec::new();
    for &(offset, length) in &loc.extents {
        let start = usize::try_from(offset).ok()?;
        let end = if length == 0 {
            source.len()
        } else {
            start.checked_add(usize::try_from(length).ok()?)?
        };
        out.extend_from_slice(source.get(start..end)?);
    }
    Some(out)
}

/// Parse the container of a whole HEIF file.
pub fn parse(data: &[u8]) -> Result<HeifInfo, CodecError> {
    if !is_heif(data) {
        return Err(CodecError::Rejected("not a HEIF container".into()));
    }
    let ftyp = child(data, b"ftyp").ok_or_else(|| truncated("ftyp"))?;
    let brand = ftyp.get(..4).map(|b| [b[0], b[1], b[2], b[3]]).ok_or_else(|| truncated("ftyp"))?;
    let meta = child(data, b"meta").ok_or_else(|| CodecError::Rejected("HEIF has no meta box".into()))?;
    let meta = meta.get(4..).ok_or_else(|| truncated("meta"))?;

    if let Some(hdlr) = child(meta, b"hdlr") {
        if hdlr.get(8..12) != Some(&b"pict"[..]) {
            return Err(CodecError::Rejected("HEIF meta handler is not 'pict'".into()));
        }
    }
    let primary_id = child(meta, b"pitm")
        .and_then(|b| {
            let mut r = Reader::new(b);
            let (version, _) = r.full_box()?;
            if version == 0 { r.u16().map(u32::from) } else { r.u32() }
        })
        .ok_or_else(|| CodecError::Rejected("HEIF has no primary item".into()))?;
    let infos = parse_iinf(child(meta, b"iinf").ok_or_else(|| truncated("iinf"))?)?;
    let locations = child(meta, b"iloc").map(parse_iloc).transpose()?.unwrap_or_default();
    let references = child(meta, b"iref").map(parse_iref).unwrap_or_default();
    let idat = child(meta, b"idat");

    let (properties, associations) = match child(meta, b"iprp") {
        Some(iprp) => {
            let props: Vec<Property> = child(iprp, b"ipco")
                .map(|ipco| boxes(ipco).map(|(k, b)| parse_property(&k, b)).collect())
                .unwrap_or_default();
            let assoc = child(iprp, b"ipma").and_then(parse_ipma).unwrap_or_default();
            (props, assoc)
        }
        None => (Vec::new(), BTreeMap::new()),
    };
    let props_of = |id: u32| {
        associations
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|&i| i.checked_sub(1).and_then(|i| properties.get(i)))
    };

    let alpha_items: Vec<u32> = references
        .iter()
        .filter(|(kind, from, _)| {
            kind == b"auxl"
                && props_of(*from).any(|p| matches!(p, Property::AuxC(urn) if is_alpha_aux(urn)))
        })
        .map(|&(_, _, to)| to)
        .collect();

    let item = |id: u32| -> ItemInfo {
        let mut info = ItemInfo {
            id,
            item_type: infos
                .get(&id)
                .map(|i| String::from_utf8_lossy(&i.item_type).into_owned())
                .unwrap_or_default(),
            has_alpha: alpha_items.contains(&id),
            ..ItemInfo::default()
        };
        for prop in props_of(id) {
            match prop {
                Property::Ispe(w, h) => (info.width, info.height) = (*w, *h),
                Property::HvcC { luma, chroma, format } => {
                    info.luma_bits.get_or_insert(*luma);
                    info.chroma_bits = Some(*chroma);
                    info.chroma_format = Some(*format);
                }
                Property::Pixi(bits) => info.luma_bits = bits.first().copied(),
                Property::Irot(r) => info.rotation = *r,
                _ => {}
            }
        }
        info
    };

    let primary = item(primary_id);
    if primary.width == 0 || primary.height == 0 {
        return Err(CodecError::Rejected("HEIF primary item has no size".into()));
    }
    let thumbnails = references
        .iter()
        .filter(|(kind, _, to)| kind == b"thmb" && *to == primary_id)
        .map(|&(_, from, _)| item(from))
        .collect();
    let color = props_of(primary_id).find_map(|p| match p {
        Property::Colr(c) => Some(c.clone()),
        _ => None,
    });

    let mut exif = None;
    let mut xmp = None;
    for (&id, infe) in &infos {
        let Some(loc) = locations.get(&id) else { continue };
        match (&infe.item_type, infe.content_type.as_deref()) {
            (b"Exif", _) => {
                exif = item_data(data, idat, loc).and_then(|d| {
                    // 4-byte offset to the TIFF header
                    let skip = u32::from_be_bytes(d.get(..4)?.try_into().ok()?) as usize;
                    d.get(4 + skip..).map(<[u8]>::to_vec)
                });
            }
            (b"mime", Some("application/rdf+xml")) => xmp = item_data(data, idat, loc),
            _ => {}
        }
    }

    Ok(HeifInfo {
        brand,
        primary,
        thumbnails,
        color,
        exif,
        xmp,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bx(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    pub(crate) fn full(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut b = vec![version, 0, 0, 0];
        b.extend_from_slice(body);
        bx(kind, &b)
    }

    fn infe(id: u16, kind: &[u8; 4], extra: &[u8]) -> Vec<u8> {
        let mut b = id.to_be_bytes().to_vec();
        b.extend_from_slice(&[0, 0]);
        b.extend_from_slice(kind);
        b.push(0);
        b.extend_from_slice(extra);
        full(b"infe", 2, &b)
    }

    fn hvcc(luma_minus8: u8) -> Vec<u8> {
        let mut b = vec![1u8; 16];
        b.extend_from_slice(&[0xFD, 0xF8 | luma_minus8, 0xF8 | luma_minus8]);
        b.extend_from_slice(&[0; 4]);
        bx(b"hvcC", &b)
    }

    /// Minimal still image: item 1 is the primary (`w x h`, luma depth),
    /// item 2 a 64x48 thumbnail, item 3 an alpha plane, item 4 EXIF in idat.
    pub(crate) fn sample_file(w: u32, h: u32, luma_minus8: u8, icc: Option<&[u8]>) -> Vec<u8> {
        let mut file = bx(b"ftyp", b"heic\0\0\0\0mif1heic");

        let mut ispe = vec![0, 0, 0, 0];
        ispe.extend_from_slice(&w.to_be_bytes());
        ispe.extend_from_slice(&h.to_be_bytes());
        let mut ispe_thumb = vec![0, 0, 0, 0];
        ispe_thumb.extend_from_slice(&64u32.to_be_bytes());
        ispe_thumb.extend_from_slice(&48u32.to_be_bytes());
        let mut ipco = bx(b"ispe", &ispe);
        ipco.extend(hvcc(luma_minus8));
        ipco.extend(bx(b"ispe", &ispe_thumb));
        ipco.extend(full(b"auxC", 0, b"urn:mpeg:hevc:2015:auxid:1\0"));
        if let Some(icc) = icc {
            let mut colr = b"prof".to_vec();
            colr.extend_from_slice(icc);
            ipco.extend(bx(b"colr", &colr));
        }
        // item -> property indices
        let mut primary_props = vec![1u8, 0x82];
        if icc.is_some() {
            primary_props.push(5);
        }
        let mut ipma = 3u32.to_be_bytes().to_vec();
        ipma.extend_from_slice(&[0, 1, primary_props.len() as u8]);
        ipma.extend_from_slice(&primary_props);
        ipma.extend_from_slice(&[0, 2, 2, 3, 2]);
        ipma.extend_from_slice(&[0, 3, 2, 3, 4]);
        let mut iprp = bx(b"ipco", &ipco);
        iprp.extend(full(b"ipma", 0, &ipma));

        let mut iinf = 4u16.to_be_bytes().to_vec();
        iinf.extend(infe(1, b"hvc1", &[]));
        iinf.extend(infe(2, b"hvc1", &[]));
        iinf.extend(infe(3, b"hvc1", &[]));
        iinf.extend(infe(4, b"Exif", &[]));

        let mut iref = bx(b"thmb", &[0, 2, 0, 1, 0, 1]);
        iref.extend(bx(b"auxl", &[0, 3, 0, 1, 0, 1]));

        // EXIF payload: zero offset, then a tiny little-endian TIFF
        let mut exif = vec![0, 0, 0, 0];
        exif.extend_from_slice(b"II*\0\x08\0\0\0\0\0\0\0\0\0");
        // iloc v1, 4-byte offsets/lengths, no base; item 4 from idat
        let mut iloc = vec![0x44, 0x00, 0, 1, 0, 4, 0, 1, 0, 0, 0, 1];
        iloc.extend_from_slice(&0u32.to_be_bytes());
        iloc.extend_from_slice(&(exif.len() as u32).to_be_bytes());

        let mut hdlr = vec![0, 0, 0, 0];
        hdlr.extend_from_slice(b"pict");
        hdlr.extend_from_slice(&[0; 13]);

        let mut meta = full(b"hdlr", 0, &hdlr);
        meta.extend(full(b"pitm", 0, &[0, 1]));
        meta.extend(full(b"iinf", 0, &iinf));
        meta.extend(full(b"iref", 0, &iref));
        meta.extend(bx(b"iprp", &iprp));
        meta.extend(full(b"iloc", 1, &iloc));
        meta.extend(bx(b"idat", &exif));
        file.extend(full(b"meta", 0, &meta));
        file
    }

    #[test]
    fn sniffs_brands() {
        let file = sample_file(10, 10, 0, None);
        assert!(is_heif(&file));
        assert!(!is_heif(b"\0\0\0\x18ftypavif\0\0\0\0"));
        assert!(!is_heif(b"short"));
    }

    #[test]
    fn primary_geometry_and_depth() {
        let info = parse(&sample_file(4032, 3024, 2, None)).unwrap();
        assert_eq!(&info.brand, b"heic");
        assert_eq!(info.primary.id, 1);
        assert_eq!((info.primary.width, info.primary.height), (4032, 3024));
        assert_eq!(info.primary.bit_depth(), 10);
        assert_eq!(info.primary.chroma_format, Some(1));
        assert!(info.primary.has_alpha);
    }

    #[test]
    fn thumbnail_and_exif_items() {
        let info = parse(&sample_file(2000, 1500, 0, None)).unwrap();
        assert_eq!(info.thumbnails.len(), 1);
        assert_eq!((info.thumbnails[0].width, info.thumbnails[0].height), (64, 48));
        assert!(!info.thumbnails[0].has_alpha);
        let exif = info.exif.unwrap();
        assert!(exif.starts_with(b"II*\0"));
    }

    #[test]
    fn icc_profile_from_colr() {
        let info = parse(&sample_file(8, 8, 0, Some(b"icc-bytes"))).unwrap();
        assert_eq!(info.color, Some(ColorInfo::Icc(b"icc-bytes".to_vec())));
    }

    #[test]
    fn rotation_swaps_display_size() {
        let item = ItemInfo {
            width: 30,
            height: 20,
            rotation: 1,
            ..ItemInfo::default()
        };
        assert_eq!(item.display_size(), (20, 30));
    }

    #[test]
    fn iloc_extent_overflow_is_rejected() {
        // v1, 8-byte offsets and base, 4-byte lengths: one item, one extent
        let mut body = vec![1, 0, 0, 0, 0x84, 0x80, 0, 1, 0, 1, 0, 0, 0, 0];
        body.extend_from_slice(&u64::MAX.to_be_bytes());
        body.extend_from_slice(&[0, 1]);
        body.extend_from_slice(&1u64.to_be_bytes());
        body.extend_from_slice(&4u32.to_be_bytes());
        assert!(matches!(parse_iloc(&body), Err(CodecError::Rejected(_))));

        body[14..22].copy_from_slice(&16u64.to_be_bytes());
        let locations = parse_iloc(&body).unwrap();
        assert_eq!(locations[&1].extents, vec![(17, 4)]);
    }

    #[test]
    fn missing_meta_is_rejected() {
        let file = bx(b"ftyp", b"heic\0\0\0\0mif1");
        assert!(matches!(parse(&file), Err(CodecError::Rejected(_))));
    }
}
