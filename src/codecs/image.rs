//! The in-memory image handed between callers and adapters.

use super::buffer::PixelBuffer;
use super::metadata::MetadataBlocks;
use serde::Serialize;
use std::collections::BTreeMap;

/// Attribute keys shared with the rest of the application.
pub mod keys {
    pub const FORMAT: &str = "format";
    pub const ORIGINAL_COLOR_MODEL: &str = "originalColorModel";
    pub const ORIGINAL_BIT_DEPTH: &str = "originalBitDepth";
    pub const ORIGINAL_SIZE: &str = "originalSize";
    pub const QUALITY: &str = "quality";
    pub const COMPRESS: &str = "compress";
    pub const SAVED_FORMAT: &str = "savedFormat";
    pub const UNIQUE_HASH: &str = "uniqueHash";
    pub const IMAGE_HISTORY: &str = "imageHistory";
}

/// A loosely typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Size { width: u32, height: u32 },
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<(u32, u32)> for AttrValue {
    fn from((width, height): (u32, u32)) -> Self {
        AttrValue::Size { width, height }
    }
}

impl From<ColorModel> for AttrValue {
    fn from(model: ColorModel) -> Self {
        AttrValue::Int(model.code())
    }
}

/// String-keyed side channel between adapters and the application.
///
/// Getters are lenient: an integer stored as a string still reads as an
/// integer, a boolean reads as `0`/`1`, and unknown keys are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, AttrValue>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Set only when the key is absent.
    pub fn set_default(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Bool(b) => Some(*b as i64),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Size { .. } => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Int(i) => Some(*i != 0),
            AttrValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            AttrValue::Size { .. } => None,
        }
    }

    pub fn get_size(&self, key: &str) -> Option<(u32, u32)> {
        match self.0.get(key)? {
            AttrValue::Size { width, height } => Some((*width, *height)),
            AttrValue::Str(s) => {
                let (w, h) = s.split_once('x')?;
                Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
            }
            _ => None,
        }
    }
}

/// Color model of the file before conversion to BGRA.
///
/// Stored in the `originalColorModel` attribute by its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColorModel {
    Unknown,
    Rgb,
    Grayscale,
    Monochrome,
    Indexed,
    YCbCr,
    Cmyk,
    CieLab,
    Raw,
}

impl ColorModel {
    pub fn code(self) -> i64 {
        match self {
            ColorModel::Unknown => 0,
            ColorModel::Rgb => 1,
            ColorModel::Grayscale => 2,
            ColorModel::Monochrome => 3,
            ColorModel::Indexed => 4,
            ColorModel::YCbCr => 5,
            ColorModel::Cmyk => 6,
            ColorModel::CieLab => 7,
            ColorModel::Raw => 8,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ColorModel::Rgb,
            2 => ColorModel::Grayscale,
            3 => ColorModel::Monochrome,
            4 => ColorModel::Indexed,
            5 => ColorModel::YCbCr,
            6 => ColorModel::Cmyk,
            7 => ColorModel::CieLab,
            8 => ColorModel::Raw,
            _ => ColorModel::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorModel::Unknown => "unknown",
            ColorModel::Rgb => "RGB",
            ColorModel::Grayscale => "grayscale",
            ColorModel::Monochrome => "monochrome",
            ColorModel::Indexed => "indexed",
            ColorModel::YCbCr => "YCbCr",
            ColorModel::Cmyk => "CMYK",
            ColorModel::CieLab => "CIELab",
            ColorModel::Raw => "raw",
        }
    }
}

/// An embedded ICC profile, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorProfile(Vec<u8>);

impl ColorProfile {
    /// `None` for an empty blob.
    pub fn new(data: Vec<u8>) -> Option<Self> {
        if data.is_empty() { None } else { Some(Self(data)) }
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Working color space inferred from EXIF when no ICC profile is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkingColorSpace {
    Srgb,
    AdobeRgb,
}

/// A decoded (or header-only) image.
///
/// `pixels` is `None` after a header-only load. `has_alpha` says whether the
/// alpha channel carries information; the buffer always stores one.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub sixteen_bit: bool,
    pub has_alpha: bool,
    pub pixels: Option<PixelBuffer>,
    pub attributes: AttributeMap,
    pub embedded_text: BTreeMap<String, String>,
    pub icc_profile: Option<ColorProfile>,
    pub working_space: Option<WorkingColorSpace>,
    pub metadata: MetadataBlocks,
}

impl Image {
    /// An image with no pixel data.
    pub fn header(width: u32, height: u32, sixteen_bit: bool, has_alpha: bool) -> Self {
        Self {
            width,
            height,
            sixteen_bit,
            has_alpha,
            ..Self::default()
        }
    }

    /// An image owning `pixels`; geometry and depth come from the buffer.
    pub fn from_pixels(pixels: PixelBuffer, has_alpha: bool) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            sixteen_bit: pixels.sixteen_bit(),
            has_alpha,
            pixels: Some(pixels),
            ..Self::default()
        }
    }

    pub fn bits_per_channel(&self) -> u8 {
        if self.sixteen_bit { 16 } else { 8 }
    }

    pub fn has_pixels(&self) -> bool {
        self.pixels.is_some()
    }

    /// The pixel buffer, or `Unsupported` for a header-only image.
    pub fn require_pixels(&self) -> Result<&PixelBuffer, super::loader::CodecError> {
        self.pixels.as_ref().ok_or_else(|| {
            super::loader::CodecError::Unsupported("image has no pixel data to save".into())
        })
    }

    pub fn original_color_model(&self) -> ColorModel {
        self.attributes
            .get_int(keys::ORIGINAL_COLOR_MODEL)
            .map(ColorModel::from_code)
            .unwrap_or(ColorModel::Unknown)
    }

    /// Record the attributes every load sets: format, color model, depth, size.
    pub(crate) fn set_origin(&mut self, format: &str, model: ColorModel, bit_depth: u32) {
        self.attributes.set(keys::FORMAT, format);
        self.attributes.set(keys::ORIGINAL_COLOR_MODEL, model);
        self.attributes.set(keys::ORIGINAL_BIT_DEPTH, bit_depth);
        self.attributes
            .set_default(keys::ORIGINAL_SIZE, (self.width, self.height));
    }
}
