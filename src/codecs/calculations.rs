//! Pure numeric helpers shared by the adapters.
//!
//! All functions here are pure and testable without any I/O or images.

/// Bounding box of the thumbnail directory written after a TIFF image.
pub const TIFF_THUMBNAIL_BOX: (u32, u32) = (160, 120);

/// Longest edge of the HEIF thumbnail, and the shorter edge an image must
/// exceed before one is written.
pub const HEIF_PREVIEW_SIZE: u32 = 1280;

/// Checkpoint interval for a loop of `total` units covering `slice` of the
/// overall progress range.
///
/// Roughly twenty checkpoints per full progress range, scaled by the
/// observer's granularity. Without an observer every unit is a checkpoint
/// (they cost nothing). Never returns zero.
///
/// ```
/// # use raster_codecs::codecs::calculations::granularity_step;
/// // 1400 rows over a 0.7 slice: 1400 / 14 = 100 rows per checkpoint
/// assert_eq!(granularity_step(1400, 0.7, Some(1.0)), 100);
/// // A finer observer halves the interval
/// assert_eq!(granularity_step(1400, 0.7, Some(2.0)), 50);
/// ```
pub fn granularity_step(total: usize, slice: f32, granularity: Option<f32>) -> usize {
    let Some(granularity) = granularity else {
        return 1;
    };
    if slice <= 0.0 || granularity <= 0.0 || !granularity.is_finite() {
        return total.max(1);
    }
    let step = (total as f64 / (20.0 * slice as f64)) / granularity as f64;
    (step as usize).max(1)
}

/// Map the 1-99 `quality` attribute onto a zlib level 0-9.
///
/// Higher quality means less compression work, so the mapping is inverse:
/// 1 → 9, 99 → 0.
pub fn png_compression_level(quality: i64) -> u8 {
    let q = quality.clamp(1, 99);
    ((99 - q) * 9 / 98) as u8
}

/// Scale `(w, h)` down to fit inside `bounds`, keeping the aspect ratio.
///
/// Never upscales and never returns a zero dimension.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }
    if src_w <= max_w && src_h <= max_h {
        return source;
    }
    let ratio = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * ratio).round() as u32).clamp(1, max_w.max(1));
    let h = ((src_h as f64 * ratio).round() as u32).clamp(1, max_h.max(1));
    (w, h)
}

/// Tone compression for 32-bit float TIFF samples.
///
/// Returns `(factor, scale)`: samples map to `pow(v / factor, scale) * 65535`.
/// Scenes peaking at or below 10 pass through linearly.
pub fn float_tone_curve(max_sample: f32) -> (f32, f32) {
    let factor = if max_sample > 10.0 {
        max_sample.log10() * 1.5
    } else {
        1.0
    };
    let scale = if factor > 1.0 { 0.75 } else { 1.0 };
    (factor, scale)
}

/// Map one float sample through the tone curve into 16-bit range.
pub fn tone_map_sample(value: f32, factor: f32, scale: f32) -> u16 {
    let v = (value / factor).max(0.0).powf(scale) * 65535.0;
    v.clamp(0.0, 65535.0).round() as u16
}

/// Whether a HEIF save should attach a preview thumbnail.
pub fn wants_heif_thumbnail(width: u32, height: u32) -> bool {
    width.min(height) > HEIF_PREVIEW_SIZE
}

/// Convert a 16-bit sample to `bits` of precision, rounding down.
pub fn reduce_sample(value: u16, bits: u8) -> u16 {
    value >> (16 - bits.clamp(1, 16))
}

/// Widen a sample of `bits` precision to the full 16-bit range.
pub fn widen_sample(value: u16, bits: u8) -> u16 {
    value << (16 - bits.clamp(1, 16))
}
