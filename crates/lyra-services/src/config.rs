//! Correction presets, pipeline settings and the optional user config file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lyra_core::{AlignmentParams, StrengthThresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PRESET: &str = "standard";
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_HOP_LENGTH: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Unknown preset `{name}` (available: {available})")]
    UnknownPreset { name: String, available: String },
    #[error("Invalid preset `{name}`: {message}")]
    InvalidPreset { name: String, message: String },
    #[error("Key shift override must be a finite number of semitones, got {0}")]
    InvalidKeyShift(f64),
}

/// Named bundle of correction thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub description: String,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub band_radius: f64,
}

impl Preset {
    fn new(description: &str, confidence_low: f64, confidence_high: f64, band_radius: f64) -> Self {
        Self {
            description: description.to_string(),
            confidence_low,
            confidence_high,
            band_radius,
        }
    }

    pub fn thresholds(&self) -> StrengthThresholds {
        StrengthThresholds {
            confidence_low: self.confidence_low,
            confidence_high: self.confidence_high,
        }
    }

    pub fn alignment(&self) -> AlignmentParams {
        AlignmentParams {
            band_radius: self.band_radius,
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidPreset {
            name: name.to_string(),
            message,
        };
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.confidence_low) || !in_unit(self.confidence_high) {
            return Err(invalid("confidence thresholds must lie in [0, 1]".into()));
        }
        if self.confidence_low >= self.confidence_high {
            return Err(invalid(format!(
                "confidence_low {} must be below confidence_high {}",
                self.confidence_low, self.confidence_high
            )));
        }
        if !(self.band_radius > 0.0 && self.band_radius <= 1.0) {
            return Err(invalid(format!("band_radius {} must lie in (0, 1]", self.band_radius)));
        }
        Ok(())
    }
}

pub fn builtin_presets() -> BTreeMap<String, Preset> {
    BTreeMap::from([
        ("light".to_string(), Preset::new("Light: favours a natural result", 0.6, 0.9, 0.08)),
        ("standard".to_string(), Preset::new("Standard: balanced correction", 0.5, 0.8, 0.10)),
        ("strong".to_string(), Preset::new("Strong: follows the reference as closely as possible", 0.4, 0.7, 0.12)),
    ])
}

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub default_preset: Option<String>,
    #[serde(default)]
    pub target_sample_rate: Option<u32>,
    #[serde(default)]
    pub hop_length: Option<usize>,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lyra")
        .join("config.toml")
}

/// Load the user config from the default location
pub fn load_user_config() -> Result<UserConfig, ConfigError> {
    load_user_config_from(&config_path())
}

/// Load a user config; a missing file yields the defaults
pub fn load_user_config_from(path: &Path) -> Result<UserConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no user config, using defaults");
            return Ok(UserConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Built-in presets merged with user-defined ones
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
    default_name: String,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self {
            presets: builtin_presets(),
            default_name: DEFAULT_PRESET.to_string(),
        }
    }
}

impl PresetCatalog {
    /// User presets override built-ins of the same name
    pub fn from_user(config: &UserConfig) -> Result<Self, ConfigError> {
        let mut catalog = Self::default();
        for (name, preset) in &config.presets {
            preset.validate(name)?;
            catalog.presets.insert(name.clone(), preset.clone());
        }
        if let Some(name) = &config.default_preset {
            catalog.get(name)?;
            catalog.default_name = name.clone();
        }
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Result<&Preset, ConfigError> {
        self.presets.get(name).ok_or_else(|| ConfigError::UnknownPreset {
            name: name.to_string(),
            available: self.names().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.presets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Preset)> + '_ {
        self.presets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Settings for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub target_sample_rate: u32,
    pub hop_length: usize,
    pub preset_name: String,
    pub preset: Preset,
    /// Skip automatic key detection and use this shift
    pub key_shift_override: Option<f64>,
    /// The reference is already an isolated vocal
    pub reference_is_stem: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let catalog = PresetCatalog::default();
        let preset = catalog
            .presets
            .get(DEFAULT_PRESET)
            .cloned()
            .unwrap_or_else(|| Preset::new("", 0.5, 0.8, 0.1));
        Self {
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            hop_length: DEFAULT_HOP_LENGTH,
            preset_name: DEFAULT_PRESET.to_string(),
            preset,
            key_shift_override: None,
            reference_is_stem: false,
        }
    }
}

impl PipelineConfig {
    /// Resolve a config from the user file and an optional preset name
    pub fn resolve(user: &UserConfig, preset: Option<&str>) -> Result<Self, ConfigError> {
        let catalog = PresetCatalog::from_user(user)?;
        let name = preset.unwrap_or(catalog.default_name()).to_string();
        let preset = catalog.get(&name)?.clone();
        Ok(Self {
            target_sample_rate: user.target_sample_rate.unwrap_or(DEFAULT_TARGET_SAMPLE_RATE),
            hop_length: user.hop_length.unwrap_or(DEFAULT_HOP_LENGTH),
            preset_name: name,
            preset,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.key_shift_override {
            Some(shift) if !shift.is_finite() => Err(ConfigError::InvalidKeyShift(shift)),
            _ => Ok(()),
        }
    }
}
