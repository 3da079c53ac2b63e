//! Derivation configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults
//! are the base layer; a user file overrides only the keys it names.
//!
//! ## Keys
//!
//! ```toml
//! # every key is optional; these are the defaults
//!
//! [imaging]
//! quality = 75              # JPEG/AVIF quality when a spec has no q token (1-100)
//! resample_filter = "box"   # box, linear, lanczos, catmullrom, gaussian, nearestneighbor
//! anchor = "smart"          # crop/fill anchor when a spec has none
//! bg_color = "#ffffff"      # flatten colour for formats without alpha
//!
//! [cache]
//! persist_manifest = true   # reuse artifacts published by earlier runs
//!
//! [processing]
//! max_processes = 4         # batch worker cap (unset = one per core)
//! ```
//!
//! Keys this crate does not know are a parse error, so a misspelt
//! setting never silently falls back to its default.

use crate::options::{Anchor, OptionDefaults, Quality, ResampleFilter, Rgb};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Validation(String),
}

/// Configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeriveConfig {
    /// Defaults for options a spec leaves unset.
    pub imaging: ImagingConfig,
    /// Persisted-manifest settings.
    pub cache: CacheConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl DeriveConfig {
    /// Check that every string setting parses and quality is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.imaging.option_defaults().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagingConfig {
    pub quality: u32,
    pub resample_filter: String,
    pub anchor: String,
    pub bg_color: String,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            resample_filter: "box".to_string(),
            anchor: "smart".to_string(),
            bg_color: "#ffffff".to_string(),
        }
    }
}

impl ImagingConfig {
    /// Parse the string settings into option defaults.
    pub fn option_defaults(&self) -> Result<OptionDefaults, ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation(
                "imaging.quality must be 1-100".into(),
            ));
        }
        let invalid = |key: &str, value: &str| {
            ConfigError::Validation(format!("imaging.{key}: unrecognized value {value:?}"))
        };
        Ok(OptionDefaults {
            quality: Quality::new(self.quality),
            filter: self
                .resample_filter
                .parse::<ResampleFilter>()
                .map_err(|_| invalid("resample_filter", &self.resample_filter))?,
            anchor: self
                .anchor
                .parse::<Anchor>()
                .map_err(|_| invalid("anchor", &self.anchor))?,
            background: self
                .bg_color
                .parse::<Rgb>()
                .map_err(|_| invalid("bg_color", &self.bg_color))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Load and save the persisted manifest of published derivations.
    pub persist_manifest: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist_manifest: true,
        }
    }
}

/// Worker pool settings for `batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on rayon workers. Unset means one per core; larger
    /// values are clamped to the core count.
    pub max_processes: Option<usize>,
}

/// Number of rayon workers for a batch run: `max_processes` clamped to
/// `1..=cores`, or `cores` when unset.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Stock defaults as a TOML table, the base layer for [`merge_toml`].
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(DeriveConfig::default()).expect("default config must serialize")
}

/// Layer `overlay` over `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value.
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

/// Parse TOML text, merge it over the stock defaults, and validate.
pub fn parse_config(text: &str) -> Result<DeriveConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(text)?;
    let config: DeriveConfig = merge_toml(stock_defaults_value(), overlay).try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file. A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<DeriveConfig, ConfigError> {
    if !path.exists() {
        return Ok(DeriveConfig::default());
    }
    parse_config(&fs::read_to_string(path)?)
}

/// Documented stock `config.toml`, printed by `image-derive gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# image-derive configuration
# ==========================
# Every setting is optional; delete whatever you are happy to leave at
# its default.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Defaults for options a spec leaves unset
# ---------------------------------------------------------------------------
[imaging]
# Encoder quality for JPEG and AVIF output (1 = worst, 100 = best).
quality = 75

# Resampling filter: box, linear, lanczos, catmullrom, gaussian, nearestneighbor.
resample_filter = "box"

# Crop/fill anchor: center, top, bottom, left, right, topleft, topright,
# bottomleft, bottomright, or smart (content-aware).
anchor = "smart"

# Colour transparent pixels are flattened onto for formats without alpha.
bg_color = "#ffffff"

# ---------------------------------------------------------------------------
# Cache
# ---------------------------------------------------------------------------
[cache]
# Reuse derived images published by earlier runs (recorded in
# _gen/.derived-manifest.json under the output directory).
persist_manifest = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for batch runs.
# Leave unset to use one worker per CPU core.
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = DeriveConfig::default();
        assert_eq!(config.imaging.quality, 75);
        assert_eq!(config.imaging.resample_filter, "box");
        assert!(config.cache.persist_manifest);
        assert_eq!(config.processing.max_processes, None);
    }

    #[test]
    fn defaults_convert_to_option_defaults() {
        let defaults = DeriveConfig::default().imaging.option_defaults().unwrap();
        assert_eq!(defaults, OptionDefaults::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = parse_config(
            r##"
[imaging]
quality = 68
resample_filter = "Lanczos"
bg_color = "#000"
"##,
        )
        .unwrap();
        assert_eq!(config.imaging.quality, 68);
        assert_eq!(config.imaging.anchor, "smart");

        let defaults = config.imaging.option_defaults().unwrap();
        assert_eq!(defaults.filter, ResampleFilter::Lanczos);
        assert_eq!(defaults.background, Rgb([0, 0, 0]));
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        assert_eq!(parse_config(stock_config_toml()).unwrap(), DeriveConfig::default());
    }

    #[test]
    fn invalid_values_rejected() {
        for text in [
            "[imaging]\nquality = 0",
            "[imaging]\nquality = 101",
            "[imaging]\nresample_filter = \"bicubic\"",
            "[imaging]\nanchor = \"middle\"",
            "[imaging]\nbg_color = \"red\"",
        ] {
            assert!(
                matches!(parse_config(text), Err(ConfigError::Validation(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn misspelt_keys_rejected() {
        assert!(matches!(
            parse_config("[imaging]\nqualty = 80"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            parse_config("[thumbnails]\nsize = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_config_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config, DeriveConfig::default());
    }

    #[test]
    fn load_config_applies_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[cache]\npersist_manifest = false\n").unwrap();
        assert!(!load_config(&path).unwrap().cache.persist_manifest);
    }

    #[test]
    fn load_config_broken_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "this is not toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    // =========================================================================
    // merge_toml / effective_threads
    // =========================================================================

    #[test]
    fn merge_toml_overlays_nested_keys() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
        let one = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&one), 1);
        let many = ProcessingConfig {
            max_processes: Some(cores + 64),
        };
        assert_eq!(effective_threads(&many), cores);
    }
}
