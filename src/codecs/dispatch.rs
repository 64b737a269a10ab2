//! Picks an adapter for a file.
//!
//! Loads are dispatched on content: the first bytes are sniffed for the
//! PNG, TIFF and HEIF signatures, then offered to the `image` crate, and
//! whatever is left goes to `zune-image`. Saves are dispatched on the target
//! extension.

use super::generic::{self, GenericRasterCodec};
use super::heif::{HeifCodec, boxes};
use super::image::Image;
use super::loader::{CodecError, ImageLoader, LoadFlags, LoadError, SaveError};
use super::observer::LoadObserver;
use super::png::PngCodec;
use super::third_party::{self, ThirdPartyRasterCodec};
use super::tiff::{TiffCodec, ifd};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from the start of a file for sniffing.
pub const SNIFF_LEN: usize = 64;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Png,
    Tiff,
    Heif,
    Generic,
    ThirdParty,
}

/// Classify the leading bytes of a file. `None` only for empty input.
pub fn sniff(head: &[u8]) -> Option<FormatKind> {
    if head.is_empty() {
        return None;
    }
    let kind = if head.starts_with(&PNG_SIGNATURE) {
        FormatKind::Png
    } else if ifd::is_tiff(head) {
        FormatKind::Tiff
    } else if boxes::is_heif(head) {
        FormatKind::Heif
    } else if generic::can_decode(head) {
        FormatKind::Generic
    } else {
        FormatKind::ThirdParty
    };
    Some(kind)
}

/// One value per adapter, itself usable as an adapter.
#[derive(Debug, Clone)]
pub enum Codec {
    Png(PngCodec),
    Tiff(TiffCodec),
    Heif(HeifCodec),
    Generic(GenericRasterCodec),
    ThirdParty(ThirdPartyRasterCodec),
}

impl Codec {
    pub fn for_kind(kind: FormatKind) -> Self {
        match kind {
            FormatKind::Png => Codec::Png(PngCodec::new()),
            FormatKind::Tiff => Codec::Tiff(TiffCodec::new()),
            FormatKind::Heif => Codec::Heif(HeifCodec::new()),
            FormatKind::Generic => Codec::Generic(GenericRasterCodec::new()),
            FormatKind::ThirdParty => Codec::ThirdParty(ThirdPartyRasterCodec::new()),
        }
    }

    pub fn kind(&self) -> FormatKind {
        match self {
            Codec::Png(_) => FormatKind::Png,
            Codec::Tiff(_) => FormatKind::Tiff,
            Codec::Heif(_) => FormatKind::Heif,
            Codec::Generic(_) => FormatKind::Generic,
            Codec::ThirdParty(_) => FormatKind::ThirdParty,
        }
    }

    /// Replace the HEIF adapter's encoder depth cap. Other adapters pass through.
    pub fn with_heif_max_bit_depth(self, bits: Option<u8>) -> Self {
        match self {
            Codec::Heif(_) => Codec::Heif(HeifCodec::configured(bits)),
            other => other,
        }
    }

    fn inner(&self) -> &dyn ImageLoader {
        match self {
            Codec::Png(c) => c,
            Codec::Tiff(c) => c,
            Codec::Heif(c) => c,
            Codec::Generic(c) => c,
            Codec::ThirdParty(c) => c,
        }
    }
}

impl ImageLoader for Codec {
    fn format_name(&self) -> &'static str {
        self.inner().format_name()
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, LoadError> {
        self.inner().load(path, flags, observer)
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), SaveError> {
        self.inner().save(image, path, observer)
    }

    fn has_alpha(&self) -> bool {
        self.inner().has_alpha()
    }

    fn sixteen_bit(&self) -> bool {
        self.inner().sixteen_bit()
    }

    fn is_read_only(&self) -> bool {
        self.inner().is_read_only()
    }
}

/// Adapter for reading `path`, chosen from its first bytes.
pub fn codec_for_path(path: &Path) -> Result<Codec, CodecError> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    let kind = sniff(&head)
        .ok_or_else(|| CodecError::Rejected(format!("{} is empty", path.display())))?;
    tracing::debug!(path = %path.display(), ?kind, "sniffed");
    Ok(Codec::for_kind(kind))
}

/// Adapter for writing a file with extension `ext` (case-insensitive).
pub fn codec_for_extension(ext: &str) -> Option<Codec> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    let kind = match ext.as_str() {
        "png" => FormatKind::Png,
        "tif" | "tiff" => FormatKind::Tiff,
        "heic" | "heif" | "hif" => FormatKind::Heif,
        e if generic::output_format(Path::new(&format!("x.{e}"))).is_some() => FormatKind::Generic,
        e if third_party::supported_output_extensions().contains(&e) => FormatKind::ThirdParty,
        _ => return None,
    };
    Some(Codec::for_kind(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{gradient_eight, write_png_fixture};
    use tempfile::TempDir;

    #[test]
    fn sniffs_builtin_signatures() {
        assert_eq!(sniff(&PNG_SIGNATURE), Some(FormatKind::Png));
        assert_eq!(sniff(b"II*\0\x08\0\0\0"), Some(FormatKind::Tiff));
        assert_eq!(sniff(b"MM\0*\0\0\0\x08"), Some(FormatKind::Tiff));
        assert_eq!(
            sniff(b"\0\0\0\x18ftypheic\0\0\0\0mif1heic"),
            Some(FormatKind::Heif)
        );
    }

    #[test]
    fn jpeg_goes_to_generic_and_the_rest_to_third_party() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(FormatKind::Generic));
        assert_eq!(sniff(b"qoif\0\0\0\x02"), Some(FormatKind::ThirdParty));
        assert_eq!(sniff(&[]), None);
    }

    #[test]
    fn avif_brand_is_not_heif() {
        assert_ne!(sniff(b"\0\0\0\x18ftypavif\0\0\0\0"), Some(FormatKind::Heif));
    }

    #[test]
    fn extensions_map_to_adapters() {
        let kind = |e| codec_for_extension(e).map(|c| c.kind());
        assert_eq!(kind("PNG"), Some(FormatKind::Png));
        assert_eq!(kind(".tif"), Some(FormatKind::Tiff));
        assert_eq!(kind("heic"), Some(FormatKind::Heif));
        assert_eq!(kind("jpg"), Some(FormatKind::Generic));
        assert_eq!(kind("webp"), Some(FormatKind::Generic));
        assert_eq!(kind("qoi"), Some(FormatKind::ThirdParty));
        assert_eq!(kind("xyz"), None);
    }

    #[test]
    fn codec_delegates_to_adapter() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("in.png");
        write_png_fixture(&path, 3, 2, ::png::ColorType::Rgba, ::png::BitDepth::Eight, false);
        let codec = codec_for_path(&path).unwrap();
        assert_eq!(codec.format_name(), "PNG");
        let image = codec.load(&path, LoadFlags::header_only(), None).unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert!(codec.sixteen_bit());
    }

    #[test]
    fn saved_file_sniffs_back_to_its_adapter() {
        let tmp = TempDir::new().unwrap();
        for (ext, kind) in [
            ("png", FormatKind::Png),
            ("tiff", FormatKind::Tiff),
            ("bmp", FormatKind::Generic),
            ("qoi", FormatKind::ThirdParty),
        ] {
            let path = tmp.path().join(format!("out.{ext}"));
            let mut image = Image::from_pixels(gradient_eight(4, 4), false);
            codec_for_extension(ext)
                .unwrap()
                .save(&mut image, &path, None)
                .unwrap();
            assert_eq!(codec_for_path(&path).unwrap().kind(), kind, "{ext}");
        }
    }

    #[test]
    fn empty_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(codec_for_path(&path), Err(CodecError::Rejected(_))));
    }
}
