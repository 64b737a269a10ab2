//! Codec configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by a sparse user file; the merged result is validated once.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [png]
//! quality = 50              # 1-99 compression hint (1 = smallest, 99 = fastest)
//!
//! [tiff]
//! compress = false          # Deflate with horizontal predictor
//!
//! [heif]
//! quality = 75              # 1-100 lossy quality, 0 = lossless
//! # max_bit_depth = 10      # Cap the encoder bit depth (8-16)
//!
//! [generic]
//! quality = 90              # 0-100 JPEG quality for the generic adapter
//!
//! [processing]
//! max_processes = 4         # Max parallel conversions (omit for auto = CPU cores)
//! ```
//!
//! ## Applying Config
//!
//! Values only become save *defaults*: [`CodecConfig::apply_defaults`] fills
//! the `quality` / `compress` attributes an image does not already carry,
//! so per-image attributes always win.
//!
//! Unknown keys are rejected to catch typos early.

use crate::codecs::dispatch::FormatKind;
use crate::codecs::image::{Image, keys};
use crate::codecs::params::{DEFAULT_HEIF_QUALITY, DEFAULT_PNG_QUALITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Codec configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    pub png: PngConfig,
    pub tiff: TiffConfig,
    pub heif: HeifConfig,
    pub generic: GenericConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl CodecConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=99).contains(&self.png.quality) {
            return Err(ConfigError::Validation("png.quality must be 1-99".into()));
        }
        if !(0..=100).contains(&self.heif.quality) {
            return Err(ConfigError::Validation("heif.quality must be 0-100".into()));
        }
        if self
            .heif
            .max_bit_depth
            .is_some_and(|bits| !(8..=16).contains(&bits))
        {
            return Err(ConfigError::Validation(
                "heif.max_bit_depth must be 8-16".into(),
            ));
        }
        if self.generic.quality > 100 {
            return Err(ConfigError::Validation(
                "generic.quality must be 0-100".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Fill save attributes the image does not carry yet, for a save
    /// through the adapter of `kind`.
    pub fn apply_defaults(&self, image: &mut Image, kind: FormatKind) {
        let attrs = &mut image.attributes;
        match kind {
            FormatKind::Png => attrs.set_default(keys::QUALITY, self.png.quality),
            FormatKind::Tiff => attrs.set_default(keys::COMPRESS, self.tiff.compress),
            FormatKind::Heif => attrs.set_default(keys::QUALITY, self.heif.quality),
            FormatKind::Generic | FormatKind::ThirdParty => {
                attrs.set_default(keys::QUALITY, self.generic.quality)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PngConfig {
    /// Compression hint: 1 packs hardest, 99 stores.
    pub quality: i64,
}

impl Default for PngConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_PNG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TiffConfig {
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeifConfig {
    /// Lossy quality, `0` for lossless.
    pub quality: i64,
    /// Upper bound on the encoder bit depth. When absent the engine's own
    /// maximum is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bit_depth: Option<u8>,
}

impl Default for HeifConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_HEIF_QUALITY,
            max_bit_depth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenericConfig {
    /// JPEG quality (0 = worst, 100 = best).
    pub quality: u32,
}

impl Default for GenericConfig {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel conversions.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CodecConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CodecConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CodecConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<CodecConfig, ConfigError> {
    resolve_config(stock_defaults_value()?, load_raw_config(dir)?)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# raster-codecs configuration
# ===========================
# All keys are optional. Values here only fill in save attributes an image
# does not already carry.

# ---------------------------------------------------------------------------
# PNG
# ---------------------------------------------------------------------------
[png]
# Compression hint, 1-99. Mapped onto zlib levels 9 (at 1) down to 0 (at 99).
quality = 50

# ---------------------------------------------------------------------------
# TIFF
# ---------------------------------------------------------------------------
[tiff]
# Deflate-compress strips with the horizontal predictor.
compress = false

# ---------------------------------------------------------------------------
# HEIF
# ---------------------------------------------------------------------------
[heif]
# Lossy quality 1-100. 0 encodes losslessly.
quality = 75
# Cap the HEVC encoder bit depth. Defaults to the engine's own maximum.
# max_bit_depth = 10

# ---------------------------------------------------------------------------
# Generic (image crate) adapter
# ---------------------------------------------------------------------------
[generic]
# JPEG quality 0-100.
quality = 90

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel conversions. Omit to use every CPU core; larger values
# are clamped to the core count.
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::gradient_eight;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = CodecConfig::default();
        assert_eq!(config.png.quality, 50);
        assert!(!config.tiff.compress);
        assert_eq!(config.heif.quality, 75);
        assert_eq!(config.heif.max_bit_depth, None);
        assert_eq!(config.generic.quality, 90);
        assert_eq!(config.processing.max_processes, None);
    }

    #[test]
    fn parse_partial_config() {
        let config: CodecConfig = toml::from_str("[heif]\nmax_bit_depth = 10\n").unwrap();
        assert_eq!(config.heif.max_bit_depth, Some(10));
        assert_eq!(config.heif.quality, 75);
        assert_eq!(config.png.quality, 50);
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.generic.quality, 90);
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            "[tiff]\ncompress = true\n\n[processing]\nmax_processes = 2\n",
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert!(config.tiff.compress);
        assert_eq!(config.processing.max_processes, Some(2));
        assert_eq!(config.png.quality, 50);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[png\nquality = ").unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(CodecConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_png_quality_bounds() {
        let mut config = CodecConfig::default();
        config.png.quality = 0;
        assert!(config.validate().is_err());
        config.png.quality = 99;
        assert!(config.validate().is_ok());
        config.png.quality = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_heif_bit_depth() {
        let mut config = CodecConfig::default();
        config.heif.max_bit_depth = Some(4);
        assert!(config.validate().is_err());
        config.heif.max_bit_depth = Some(12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_zero_processes() {
        let mut config = CodecConfig::default();
        config.processing.max_processes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[generic]\nquality = 150\n").unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<CodecConfig, _> = toml::from_str("[png]\nlevel = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<CodecConfig, _> = toml::from_str("[avif]\nquality = 3\n");
        assert!(result.is_err());
    }

    // =========================================================================
    // Threads
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_processes: Some(cores + 64),
        };
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // merge_toml
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("a").unwrap().as_integer(), Some(1));
        assert_eq!(merged.get("b").unwrap().as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_preserves_nested_base_keys() {
        let base = stock_defaults_value().unwrap();
        let overlay: toml::Value = toml::from_str("[heif]\nquality = 0").unwrap();
        let config: CodecConfig = merge_toml(base, overlay).try_into().unwrap();
        assert_eq!(config.heif.quality, 0);
        assert_eq!(config.png.quality, 50);
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: CodecConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = CodecConfig::default();
        assert_eq!(config.png.quality, defaults.png.quality);
        assert_eq!(config.tiff.compress, defaults.tiff.compress);
        assert_eq!(config.heif.quality, defaults.heif.quality);
        assert_eq!(config.generic.quality, defaults.generic.quality);
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[png]", "[tiff]", "[heif]", "[generic]", "[processing]"] {
            assert!(content.contains(section), "{section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value().unwrap();
        for section in ["png", "tiff", "heif", "generic", "processing"] {
            assert!(val.get(section).is_some(), "{section}");
        }
    }

    // =========================================================================
    // Applying defaults
    // =========================================================================

    #[test]
    fn apply_defaults_fills_missing_attributes() {
        let mut config = CodecConfig::default();
        config.tiff.compress = true;
        let mut image = Image::from_pixels(gradient_eight(2, 2), false);
        config.apply_defaults(&mut image, FormatKind::Tiff);
        assert_eq!(image.attributes.get_bool(keys::COMPRESS), Some(true));
        config.apply_defaults(&mut image, FormatKind::Heif);
        assert_eq!(image.attributes.get_int(keys::QUALITY), Some(75));
    }

    #[test]
    fn apply_defaults_keeps_explicit_attributes() {
        let config = CodecConfig::default();
        let mut image = Image::from_pixels(gradient_eight(2, 2), false);
        image.attributes.set(keys::QUALITY, 12i64);
        config.apply_defaults(&mut image, FormatKind::Generic);
        assert_eq!(image.attributes.get_int(keys::QUALITY), Some(12));
    }
}
