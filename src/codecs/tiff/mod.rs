//! TIFF adapter.
//!
//! | Module | Role |
//! |--------|------|
//! | `ifd` | Header and directory parsing, little-endian directory writer, EXIF extraction |
//! | `decode` | Strip decompression and sample conversion (integer and float paths) |
//! | `encode` | RGB(A) strip writer with thumbnail directory |
//!
//! Only the first directory is decoded. Progress: strips span 0.1–0.9 (the
//! float path splits that range between its peak scan and its mapping
//! pass); saves report strips over 0.1–0.9.

mod decode;
mod encode;
pub mod ifd;

pub use encode::PlanarConfig;

use super::atomic::AtomicFile;
use super::image::{ColorProfile, Image, keys};
use super::loader::{CodecError, ImageLoader, LoadFlags, loading_failed};
use super::metadata::{self, MetadataBlocks, iptc_from_photoshop};
use super::observer::{LoadObserver, Progress};
use super::params::TiffSaveOptions;
use super::pixels::apply_orientation;
use decode::{Layout, decode_float, decode_integer};
use ifd::{TiffFile, tag};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct TiffCodec {
    planar: PlanarConfig,
}

impl TiffCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that writes with the given channel layout. Loading accepts both.
    pub fn with_planar(planar: PlanarConfig) -> Self {
        Self { planar }
    }
}

impl ImageLoader for TiffCodec {
    fn format_name(&self) -> &'static str {
        "TIFF"
    }

    fn load(
        &self,
        path: &Path,
        flags: LoadFlags,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<Image, CodecError> {
        load_tiff(path, flags, Progress::new(observer))
            .map_err(|e| loading_failed(self.format_name(), path, e))
    }

    fn save(
        &self,
        image: &mut Image,
        path: &Path,
        observer: Option<&mut dyn LoadObserver>,
    ) -> Result<(), CodecError> {
        self.save_tiff(image, path, Progress::new(observer))
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

fn collect_metadata(file: &TiffFile<'_>) -> MetadataBlocks {
    let primary = &file.ifds[0];
    let mut blocks = MetadataBlocks::default();
    if let Some(exif) = ifd::exif_block(file) {
        blocks.set_exif(&exif);
    }
    if let Some(iptc) = primary.bytes(tag::IPTC) {
        blocks.set_iptc(iptc);
    } else if let Some(iim) = primary.bytes(tag::PHOTOSHOP).and_then(iptc_from_photoshop) {
        blocks.set_iptc(iim);
    }
    if let Some(xmp) = primary.bytes(tag::XMP) {
        blocks.set_xmp(xmp);
    }
    blocks
}

fn load_tiff(path: &Path, flags: LoadFlags, mut progress: Progress<'_>) -> Result<Image, CodecError> {
    let data = std::fs::read(path)?;
    let file = TiffFile::parse(&data)?;
    let primary = &file.ifds[0];
    let layout = Layout::from_ifd(primary, file.order)?;
    tracing::debug!(
        width = layout.width,
        height = layout.height,
        bits = layout.bits,
        samples = layout.samples_per_pixel,
        photometric = ?layout.photometric,
        compression = ?layout.compression,
        separate_planes = layout.separate_planes,
        strips = layout.strip_offsets.len(),
        "TIFF header"
    );

    let rotated = matches!(layout.orientation, 5..=8);
    let (width, height) = if rotated {
        (layout.height, layout.width)
    } else {
        (layout.width, layout.height)
    };
    let mut image = Image::header(width, height, layout.sixteen_bit(), layout.has_alpha);
    image.set_origin(
        "TIFF",
        layout.photometric.color_model(layout.bits),
        layout.bits as u32,
    );
    image
        .attributes
        .set(keys::ORIGINAL_SIZE, (layout.width, layout.height));

    if flags.contains(LoadFlags::ICC_PROFILE) {
        image.icc_profile = primary
            .bytes(tag::ICC_PROFILE)
            .and_then(|icc| ColorProfile::new(icc.to_vec()));
    }
    if flags.wants_text() {
        for (code, name, _) in encode::TEXT_TAGS {
            if let Some(text) = primary.ascii(code) {
                image.embedded_text.insert(name.to_string(), text);
            }
        }
        if let Some(software) = primary.ascii(tag::SOFTWARE) {
            image.embedded_text.insert("Software".to_string(), software);
        }
    }

    if flags.wants_pixels() {
        layout.check_decodable()?;
        progress.report(0.1);
        let buffer = if layout.is_float() {
            decode_float(&file, &layout, &mut progress)?
        } else {
            decode_integer(&file, &layout, &mut progress)?
        };
        let buffer = apply_orientation(buffer, layout.orientation)?;
        image.pixels = Some(buffer);
    }

    metadata::attach_to_image(&mut image, path, flags, collect_metadata(&file))?;
    progress.finish();
    Ok(image)
}

impl TiffCodec {
    fn save_tiff(&self, image: &Image, path: &Path, mut progress: Progress<'_>) -> Result<(), CodecError> {
        let options = TiffSaveOptions::from_attributes(&image.attributes);
        progress.report(0.05);
        let bytes = encode::encode(image, self.planar, options.deflate, &mut progress)?;
        let mut out = AtomicFile::create(path)?;
        out.file().write_all(&bytes)?;
        progress.report(0.95);
        out.commit()?;
        progress.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::buffer::{PixelBuffer, Samples};
    use crate::codecs::image::ColorModel;
    use crate::codecs::metadata::MetadataSource;
    use super::ifd::{IfdBuilder, TiffBuilder};
    use crate::test_helpers::{
        CancelAfter, RecordingObserver, TiffFixture, gradient_eight, gradient_sixteen,
    };
    use tempfile::TempDir;

    fn round_trip(codec: TiffCodec, pixels: &PixelBuffer, alpha: bool, compress: bool) -> Image {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.tif");
        let mut image = Image::from_pixels(pixels.clone(), alpha);
        image.attributes.set(keys::COMPRESS, compress);
        codec.save(&mut image, &path, None).unwrap();
        assert_eq!(image.attributes.get_str(keys::SAVED_FORMAT), Some("TIFF"));
        codec.load(&path, LoadFlags::default(), None).unwrap()
    }

    #[test]
    fn eight_bit_rgb_round_trip() {
        let pixels = gradient_eight(37, 21);
        let back = round_trip(TiffCodec::new(), &pixels, false, false);
        assert!(!back.has_alpha);
        assert_eq!(back.pixels, Some(pixels));
    }

    #[test]
    fn sixteen_bit_deflate_round_trip() {
        let pixels = gradient_sixteen(40, 33);
        let back = round_trip(TiffCodec::new(), &pixels, false, true);
        assert!(back.sixteen_bit);
        assert_eq!(back.pixels, Some(pixels));
    }

    #[test]
    fn planar_and_contiguous_decode_identically() {
        let pixels = gradient_sixteen(19, 300);
        for compress in [false, true] {
            let a = round_trip(TiffCodec::new(), &pixels, false, compress);
            let b = round_trip(TiffCodec::with_planar(PlanarConfig::Separate), &pixels, false, compress);
            assert_eq!(a.pixels, b.pixels);
            assert_eq!(a.pixels.as_ref(), Some(&pixels));
        }
    }

    #[test]
    fn alpha_is_premultiplied_on_save() {
        let pixels = PixelBuffer::from_samples(1, 1, Samples::Eight(vec![200, 100, 50, 128])).unwrap();
        let back = round_trip(TiffCodec::new(), &pixels, true, false);
        assert!(back.has_alpha);
        let px = back.pixels.unwrap().pixel16(0, 0).unwrap();
        assert_eq!(px.map(|v| v / 257), [100, 50, 25, 128]);
    }

    #[test]
    fn thumbnail_directory_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.tif");
        let mut image = Image::from_pixels(gradient_eight(400, 300), false);
        TiffCodec::new().save(&mut image, &path, None).unwrap();
        let data = std::fs::read(&path).unwrap();
        let file = TiffFile::parse(&data).unwrap();
        assert_eq!(file.ifds.len(), 2);
        let thumb = &file.ifds[1];
        assert_eq!(thumb.value(tag::NEW_SUBFILE_TYPE), Some(1));
        assert_eq!(thumb.value(tag::IMAGE_WIDTH), Some(160));
        assert_eq!(thumb.value(tag::IMAGE_LENGTH), Some(120));
        assert!(
            file.ifds[0]
                .ascii(tag::SOFTWARE)
                .is_some_and(|s| s.starts_with("raster-codecs"))
        );
    }

    #[test]
    fn header_only_reports_source_properties() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gray.tif");
        TiffFixture::gray16(6, 4).write(&path);
        let image = TiffCodec::new().load(&path, LoadFlags::header_only(), None).unwrap();
        assert!(image.pixels.is_none());
        assert_eq!((image.width, image.height), (6, 4));
        assert!(image.sixteen_bit);
        assert_eq!(image.original_color_model(), ColorModel::Grayscale);
        assert_eq!(image.attributes.get_int(keys::ORIGINAL_BIT_DEPTH), Some(16));
    }

    #[test]
    fn gray_replicates_with_opaque_alpha() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gray.tif");
        TiffFixture::gray16(6, 4).write(&path);
        let image = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap();
        let pixels = image.pixels.unwrap();
        // Fixture sample at (x, y) is x * 1000 + y
        assert_eq!(pixels.pixel16(5, 3), Some([5003, 5003, 5003, 65535]));
    }

    #[test]
    fn float_samples_are_tone_mapped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hdr.tif");
        // Peak 1000: factor = 4.5, scale = 0.75
        TiffFixture::float_rgb(&[[1000.0, 0.0, 4.5]]).write(&path);
        let image = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap();
        assert!(image.sixteen_bit);
        assert_eq!(image.attributes.get_int(keys::ORIGINAL_BIT_DEPTH), Some(32));
        let px = image.pixels.unwrap().pixel16(0, 0).unwrap();
        assert_eq!(px[2], 65535);
        assert_eq!(px[1], 0);
        assert_eq!(px[0], 65535);
    }

    #[test]
    fn separate_planes_with_uneven_strip_count_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("odd.tif");
        TiffFixture::planar_rgb8(4, 4, 2).drop_last_strip().write(&path);
        let err = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap_err();
        assert!(matches!(err, CodecError::Rejected(_)));
        // Header-only reads do not need the strip table.
        assert!(TiffCodec::new().load(&path, LoadFlags::header_only(), None).is_ok());
    }

    #[test]
    fn orientation_is_normalised() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rotated.tif");
        TiffFixture::planar_rgb8(3, 2, 2).orientation(6).write(&path);
        let image = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap();
        assert_eq!((image.width, image.height), (2, 3));
        let pixels = image.pixels.unwrap();
        assert_eq!((pixels.width(), pixels.height()), (2, 3));
        assert_eq!(image.attributes.get_size(keys::ORIGINAL_SIZE), Some((3, 2)));
    }

    #[test]
    fn cancellation_stops_strip_loop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tall.tif");
        // 2000 px RGB rows make 10-row strips: 40 strips, a poll every 2.
        let mut image = Image::from_pixels(gradient_eight(2000, 400), false);
        TiffCodec::new().save(&mut image, &path, None).unwrap();
        let mut observer = CancelAfter::new(1);
        let err = TiffCodec::new()
            .load(&path, LoadFlags::default(), Some(&mut observer))
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(observer.polls, 2);
    }

    #[test]
    fn progress_reaches_one() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("p.tif");
        let mut image = Image::from_pixels(gradient_eight(8, 100), false);
        let mut observer = RecordingObserver::default();
        TiffCodec::new().save(&mut image, &path, Some(&mut observer)).unwrap();
        assert_eq!(observer.values.last().copied(), Some(1.0));
        assert!(observer.values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn metadata_survives_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.tif");
        let mut image = Image::from_pixels(gradient_eight(4, 4), false);
        image.icc_profile = ColorProfile::new(vec![3u8; 64]);
        image.metadata.set_xmp(b"<x:xmpmeta/>");
        image.metadata.set_iptc(&[0x1C, 0x02, 0x05, 0x00, 0x02, b'H', b'i']);
        image.embedded_text.insert("Artist".into(), "Jo".into());
        image.metadata.set_exif(&camera_exif());
        TiffCodec::new().save(&mut image, &path, None).unwrap();

        let back = TiffCodec::new().load(&path, LoadFlags::ALL, None).unwrap();
        assert_eq!(back.icc_profile, image.icc_profile);
        assert_eq!(back.metadata.xmp, image.metadata.xmp);
        assert_eq!(back.metadata.iptc, image.metadata.iptc);
        assert_eq!(back.embedded_text.get("Artist").map(String::as_str), Some("Jo"));
        assert_eq!(
            back.metadata.exif_tag_string(exif::Tag::DateTimeOriginal).as_deref(),
            Some("2024:05:01 10:00:00")
        );
        assert_eq!(
            back.metadata.exif_tag_string(exif::Tag::GPSLatitudeRef).as_deref(),
            Some("S")
        );
        assert!(back.metadata.gps_latitude().is_some_and(|lat| (lat + 33.5).abs() < 1e-9));
    }

    #[test]
    fn rotated_source_exif_reads_upright() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rotated.tif");
        TiffFixture::planar_rgb8(3, 2, 2)
            .orientation(6)
            .exif_date("2023:01:02 03:04:05")
            .write(&path);
        let image = TiffCodec::new().load(&path, LoadFlags::ALL, None).unwrap();
        assert_eq!((image.width, image.height), (2, 3));
        assert_eq!(
            image.metadata.exif_tag_string(exif::Tag::DateTimeOriginal).as_deref(),
            Some("2023:01:02 03:04:05")
        );
        let block = image.metadata.exif.clone().unwrap();
        let exif = exif::Reader::new().read_raw(block).unwrap();
        let orientation = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY).unwrap();
        assert_eq!(orientation.value.get_uint(0), Some(1));
    }

    #[test]
    fn excess_samples_per_pixel_fail_cleanly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wide.tif");
        TiffFixture::rgb16_deflate(60_000, 60)
            .samples_per_pixel(65_535)
            .write(&path);
        let err = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap_err();
        assert!(matches!(err, CodecError::Rejected(_)), "{err:?}");
        assert!(TiffCodec::new().load(&path, LoadFlags::header_only(), None).is_ok());
    }

    #[test]
    fn predictor_on_float_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pred.tif");
        TiffFixture::float_rgb(&[[0.5, 0.25, 1.0]]).predictor(2).write(&path);
        let err = TiffCodec::new().load(&path, LoadFlags::default(), None).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)), "{err:?}");
    }

    /// EXIF structure with DateTimeOriginal and a southern GPS latitude.
    fn camera_exif() -> Vec<u8> {
        let mut b = TiffBuilder::new();
        let mut exif = IfdBuilder::new();
        exif.ascii(0x9003, "2024:05:01 10:00:00");
        let exif_at = b.write_ifd(&exif).unwrap();
        let mut gps = IfdBuilder::new();
        let mut latitude = Vec::new();
        for (n, d) in [(33u32, 1u32), (30, 1), (0, 1)] {
            latitude.extend_from_slice(&n.to_le_bytes());
            latitude.extend_from_slice(&d.to_le_bytes());
        }
        gps.ascii(0x0001, "S").raw(0x0002, ifd::field::RATIONAL, 3, latitude);
        let gps_at = b.write_ifd(&gps).unwrap();
        let mut top = IfdBuilder::new();
        top.long(tag::EXIF_IFD, &[exif_at]).long(tag::GPS_IFD, &[gps_at]);
        b.push_ifd(&top).unwrap();
        b.finish()
    }
}
