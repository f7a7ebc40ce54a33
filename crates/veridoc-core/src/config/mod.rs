//! Engine configuration.
//!
//! One explicit, validated record passed into the pipeline — there are no
//! environment-driven flags anywhere in the engine. The record loads from
//! TOML; anything malformed fails fast with code `INVALID_CONFIG` (or
//! `MALFORMED_CALIBRATION` for the calibration section) rather than silently
//! defaulting.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CachePolicy;
use crate::calibration::{CalibrationEntry, CalibrationError, CalibrationTable};
use crate::fusion::FusionConfig;

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of bounds (`INVALID_CONFIG`).
    #[error("invalid config: {reason}")]
    Validation {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The calibration section is malformed (`MALFORMED_CALIBRATION`).
    #[error("malformed calibration: {0}")]
    Calibration(#[from] CalibrationError),
}

/// Inline calibration table specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CalibrationTableSpec {
    /// Table-level default threshold.
    pub default_threshold: f64,
    /// Table-level default weight.
    pub default_weight: f64,
    /// Explicit entries (wildcard `"*"` allowed).
    #[serde(default)]
    pub entries: Vec<CalibrationEntry>,
}

/// The engine configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Minimum confidence for a single-source fusion result to be valid.
    pub min_valid_confidence: f64,
    /// Threshold at or above which a fusion source counts as
    /// high-confidence.
    pub high_confidence: f64,
    /// Named subsystem versions contributing to cache keys. Bumping any
    /// version invalidates every cached result for documents processed with
    /// the new configuration.
    pub engine_versions: BTreeMap<String, String>,
    /// Cache bounds and freshness.
    pub cache: CachePolicy,
    /// Calibration table; the built-in default table applies when absent.
    pub calibration: Option<CalibrationTableSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut engine_versions = BTreeMap::new();
        engine_versions.insert("analyzer".to_string(), "1.0.0".to_string());
        engine_versions.insert("extraction".to_string(), "1.0.0".to_string());
        engine_versions.insert("ocr".to_string(), "1.0.0".to_string());
        Self {
            min_valid_confidence: crate::fusion::DEFAULT_MIN_VALID_CONFIDENCE,
            high_confidence: crate::fusion::DEFAULT_HIGH_CONFIDENCE,
            engine_versions,
            cache: CachePolicy::default(),
            calibration: None,
        }
    }
}

impl EngineConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML and
    /// [`ConfigError::Validation`] when a value is out of bounds.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on the first violation, or
    /// [`ConfigError::Calibration`] if the calibration section cannot build
    /// a table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("min_valid_confidence", self.min_valid_confidence)?;
        validate_unit_interval("high_confidence", self.high_confidence)?;
        if self.min_valid_confidence > self.high_confidence {
            return Err(ConfigError::Validation {
                reason: format!(
                    "min_valid_confidence {} exceeds high_confidence {}",
                    self.min_valid_confidence, self.high_confidence
                ),
            });
        }
        if self.engine_versions.is_empty() {
            return Err(ConfigError::Validation {
                reason: "engine_versions must name at least one subsystem".to_string(),
            });
        }
        for (name, version) in &self.engine_versions {
            if name.trim().is_empty() || version.trim().is_empty() {
                return Err(ConfigError::Validation {
                    reason: "engine_versions entries must be non-empty".to_string(),
                });
            }
        }
        self.cache.validate().map_err(|e| ConfigError::Validation {
            reason: e.to_string(),
        })?;
        // Building the table exercises full calibration validation.
        let _ = self.build_calibration()?;
        Ok(())
    }

    /// The fusion thresholds drawn from this configuration.
    #[must_use]
    pub const fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            min_valid_confidence: self.min_valid_confidence,
            high_confidence: self.high_confidence,
        }
    }

    /// Builds the calibration table: the inline spec when present, the
    /// built-in default table otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Calibration`] when the inline spec is
    /// malformed.
    pub fn build_calibration(&self) -> Result<CalibrationTable, ConfigError> {
        match &self.calibration {
            None => Ok(CalibrationTable::built_in()),
            Some(spec) => Ok(CalibrationTable::new(
                spec.entries.clone(),
                spec.default_threshold,
                spec.default_weight,
            )?),
        }
    }
}

fn validate_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            reason: format!("{name} must lie in (0, 1], got {value}"),
        })
    }
}
