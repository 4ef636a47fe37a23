//! Configuration (§4.9): a layered YAML document with named performance
//! presets, overridable by environment variables.
//!
//! Grounded in `original_source/inferno-comics-recog/src/config/ComicMatcherConfig.py`:
//! `PERFORMANCE_LEVEL` selects a preset; applying a preset copies its
//! fields onto the top-level config; `similarity_threshold` accepts a
//! percentage string, a decimal string, or a bare number above or below 1.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const ENV_CONFIG_PATH: &str = "MATCHER_CONFIG_PATH";
const ENV_PERFORMANCE_LEVEL: &str = "PERFORMANCE_LEVEL";

/// Feature-count knobs and family enable-flags for a preset (§4.9 `detectors`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Detectors {
    pub use_sift: bool,
    pub use_orb: bool,
    pub max_sift_features: usize,
    pub max_orb_features: usize,
}

impl Default for Detectors {
    fn default() -> Self {
        Self {
            use_sift: true,
            use_orb: true,
            max_sift_features: 1000,
            max_orb_features: 1000,
        }
    }
}

/// Per-family fusion weights (§4.5). Kept alongside the preset so a
/// `fast` preset can, e.g., de-emphasize the slower family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeatureWeights {
    pub sift: f32,
    pub orb: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self { sift: 0.7, orb: 0.3 }
    }
}

/// Boolean toggles a preset may flip (§4.9 `options`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Options {
    pub use_advanced_matching: bool,
    pub use_comic_detection: bool,
    pub cache_only: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            use_advanced_matching: true,
            use_comic_detection: true,
            cache_only: false,
        }
    }
}

/// One named performance preset (`fast`, `balanced`, `accurate`, `custom`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Preset {
    pub image_size: u32,
    pub max_workers: usize,
    pub detectors: Detectors,
    pub feature_weights: FeatureWeights,
    pub options: Options,
}

fn default_presets() -> HashMap<String, Preset> {
    let mut presets = HashMap::new();
    presets.insert(
        "fast".to_string(),
        Preset {
            image_size: 600,
            max_workers: 8,
            detectors: Detectors {
                use_sift: true,
                use_orb: true,
                max_sift_features: 400,
                max_orb_features: 400,
            },
            feature_weights: FeatureWeights::default(),
            options: Options {
                use_advanced_matching: false,
                use_comic_detection: true,
                cache_only: false,
            },
        },
    );
    presets.insert(
        "balanced".to_string(),
        Preset {
            image_size: 800,
            max_workers: 6,
            detectors: Detectors::default(),
            feature_weights: FeatureWeights::default(),
            options: Options::default(),
        },
    );
    presets.insert(
        "accurate".to_string(),
        Preset {
            image_size: 1000,
            max_workers: 4,
            detectors: Detectors {
                use_sift: true,
                use_orb: true,
                max_sift_features: 1000,
                max_orb_features: 1000,
            },
            feature_weights: FeatureWeights::default(),
            options: Options {
                use_advanced_matching: true,
                use_comic_detection: true,
                cache_only: false,
            },
        },
    );
    presets
}

/// The effective, flattened configuration (§4.9). `performance_level`
/// names which preset was applied; its fields have already been copied
/// onto the top level by [`Config::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub performance_level: String,
    pub result_batch: usize,
    #[serde(deserialize_with = "deserialize_threshold", serialize_with = "serialize_threshold")]
    pub similarity_threshold: f64,
    pub image_size: u32,
    pub max_workers: usize,
    pub detectors: Detectors,
    pub feature_weights: FeatureWeights,
    pub options: Options,
    #[serde(default)]
    pub presets: HashMap<String, Preset>,
}

impl Default for Config {
    fn default() -> Self {
        let balanced = default_presets().remove("balanced").expect("balanced preset");
        Self {
            performance_level: "balanced".to_string(),
            result_batch: 10,
            similarity_threshold: 0.55,
            image_size: balanced.image_size,
            max_workers: balanced.max_workers,
            detectors: balanced.detectors,
            feature_weights: balanced.feature_weights,
            options: balanced.options,
            presets: default_presets(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, falling back to defaults; then
    /// apply the preset named by `PERFORMANCE_LEVEL` if set, else the
    /// document's own `performance_level`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_yaml(&text)?
        } else {
            Self::default()
        };

        let level = std::env::var(ENV_PERFORMANCE_LEVEL)
            .ok()
            .unwrap_or_else(|| config.performance_level.clone());
        config.apply_preset(&level)?;
        Ok(config)
    }

    /// The config file path, honoring `MATCHER_CONFIG_PATH`.
    pub fn resolve_path(explicit: Option<&Path>) -> std::path::PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return std::path::PathBuf::from(p);
        }
        std::path::PathBuf::from("config.yaml")
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        if config.presets.is_empty() {
            config.presets = default_presets();
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Copy a named preset's fields onto the top level (§4.9). Applying
    /// the same preset twice is idempotent by construction: the preset
    /// fields fully determine the top-level fields they cover.
    pub fn apply_preset(&mut self, name: &str) -> Result<(), ConfigError> {
        if name == "custom" {
            self.performance_level = name.to_string();
            return Ok(());
        }
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?
            .clone();
        self.performance_level = name.to_string();
        self.image_size = preset.image_size;
        self.max_workers = preset.max_workers;
        self.detectors = preset.detectors;
        self.feature_weights = preset.feature_weights;
        self.options = preset.options;
        Ok(())
    }
}

/// Parse a `similarity_threshold` value per §4.9/§8: a percentage string,
/// a decimal string, or a bare number — all normalized to `[0, 1]`.
pub fn parse_threshold(raw: &str) -> Result<f64, ConfigError> {
    let trimmed = raw.trim();
    if let Some(pct) = trimmed.strip_suffix('%') {
        let value: f64 = pct
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidThreshold(raw.to_string()))?;
        return Ok(value / 100.0);
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| ConfigError::InvalidThreshold(raw.to_string()))?;
    Ok(normalize_numeric_threshold(value))
}

fn normalize_numeric_threshold(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

fn deserialize_threshold<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(normalize_numeric_threshold(n)),
        Raw::Text(s) => parse_threshold(&s).map_err(serde::de::Error::custom),
    }
}

fn serialize_threshold<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(*value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_parses_percent_decimal_and_bare_number() {
        assert_eq!(parse_threshold("55%").unwrap(), 0.55);
        assert_eq!(parse_threshold("0.55").unwrap(), 0.55);
        assert_eq!(normalize_numeric_threshold(55.0), 0.55);
        assert_eq!(normalize_numeric_threshold(0.55), 0.55);
    }

    #[test]
    fn default_config_has_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.result_batch, 10);
        assert_eq!(config.similarity_threshold, 0.55);
    }

    #[test]
    fn applying_preset_twice_is_idempotent() {
        let mut a = Config::default();
        let mut b = Config::default();
        a.apply_preset("accurate").unwrap();
        b.apply_preset("accurate").unwrap();
        b.apply_preset("accurate").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let mut config = Config::default();
        assert!(config.apply_preset("nonexistent").is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config, parsed);
    }
}
