//! Per-field confidence calibration.
//!
//! The calibration table decides when an extracted value is trustworthy
//! enough to accept without further work. Resolution for a field name is
//! exact match first, then the wildcard entry (`"*"`), then the table-level
//! defaults. Thresholds and weights live in `(0, 1]`; anything else is a
//! malformed table and fails fast at construction time (never silently
//! defaulted).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Field name that supplies a default when no exact match exists.
pub const WILDCARD_FIELD: &str = "*";

/// Table-level default threshold when neither an exact nor a wildcard entry
/// matches.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Table-level default weight.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Maximum number of calibration entries accepted in one table.
pub const MAX_CALIBRATION_ENTRIES: usize = 4_096;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from calibration table construction. The code for all of these on
/// the wire is `MALFORMED_CALIBRATION`.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum CalibrationError {
    /// A threshold or weight lies outside `(0, 1]`.
    #[error("calibration value out of range for {field_name}: {parameter} = {value}")]
    ValueOutOfRange {
        /// Field the entry applies to.
        field_name: String,
        /// Which parameter was rejected (`threshold` or `weight`).
        parameter: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// An entry has an empty field name.
    #[error("calibration entry has an empty field name")]
    EmptyFieldName,

    /// Two entries target the same field name.
    #[error("duplicate calibration entry for field {field_name}")]
    DuplicateEntry {
        /// The duplicated field name.
        field_name: String,
    },

    /// The table exceeds the entry bound.
    #[error("too many calibration entries: {count} exceeds limit {limit}")]
    TooManyEntries {
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A single calibration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CalibrationEntry {
    /// Field name the entry applies to, or [`WILDCARD_FIELD`].
    pub field_name: String,
    /// Extraction method the thresholds were calibrated against
    /// (e.g. `"ocr"`, `"table_parser"`, `"regex"`).
    pub method: String,
    /// Document type the calibration was measured on (`"*"` for any).
    pub doc_type: String,
    /// Minimum acceptable confidence, in `(0, 1]`.
    pub threshold: f64,
    /// Relative weight of the field in aggregate scoring, in `(0, 1]`.
    pub weight: f64,
}

impl CalibrationEntry {
    /// Creates a validated entry.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::EmptyFieldName`] for a blank field name,
    /// or [`CalibrationError::ValueOutOfRange`] when `threshold` or `weight`
    /// lies outside `(0, 1]`.
    pub fn new(
        field_name: impl Into<String>,
        method: impl Into<String>,
        doc_type: impl Into<String>,
        threshold: f64,
        weight: f64,
    ) -> Result<Self, CalibrationError> {
        let field_name = field_name.into();
        if field_name.trim().is_empty() {
            return Err(CalibrationError::EmptyFieldName);
        }
        validate_unit_interval(&field_name, "threshold", threshold)?;
        validate_unit_interval(&field_name, "weight", weight)?;
        Ok(Self {
            field_name,
            method: method.into(),
            doc_type: doc_type.into(),
            threshold,
            weight,
        })
    }
}

fn validate_unit_interval(
    field_name: &str,
    parameter: &'static str,
    value: f64,
) -> Result<(), CalibrationError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(CalibrationError::ValueOutOfRange {
            field_name: field_name.to_string(),
            parameter,
            value,
        })
    }
}

/// A resolved calibration for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    /// Minimum acceptable confidence.
    pub threshold: f64,
    /// Relative field weight.
    pub weight: f64,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Per-field calibration table with wildcard fallback and table defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    entries: BTreeMap<String, CalibrationEntry>,
    default_threshold: f64,
    default_weight: f64,
}

impl CalibrationTable {
    /// Builds a table from entries and table-level defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] if any entry is malformed, two entries
    /// share a field name, the defaults lie outside `(0, 1]`, or the entry
    /// count exceeds [`MAX_CALIBRATION_ENTRIES`].
    pub fn new(
        entries: Vec<CalibrationEntry>,
        default_threshold: f64,
        default_weight: f64,
    ) -> Result<Self, CalibrationError> {
        if entries.len() > MAX_CALIBRATION_ENTRIES {
            return Err(CalibrationError::TooManyEntries {
                count: entries.len(),
                limit: MAX_CALIBRATION_ENTRIES,
            });
        }
        validate_unit_interval(WILDCARD_FIELD, "threshold", default_threshold)?;
        validate_unit_interval(WILDCARD_FIELD, "weight", default_weight)?;

        let mut map = BTreeMap::new();
        for entry in entries {
            // Entries arriving through serde skip `CalibrationEntry::new`;
            // re-validate here so every constructed table is well-formed.
            validate_unit_interval(&entry.field_name, "threshold", entry.threshold)?;
            validate_unit_interval(&entry.field_name, "weight", entry.weight)?;
            if entry.field_name.trim().is_empty() {
                return Err(CalibrationError::EmptyFieldName);
            }
            if map.insert(entry.field_name.clone(), entry.clone()).is_some() {
                return Err(CalibrationError::DuplicateEntry {
                    field_name: entry.field_name,
                });
            }
        }

        Ok(Self {
            entries: map,
            default_threshold,
            default_weight,
        })
    }

    /// The built-in default table used when no calibration source is
    /// configured.
    ///
    /// Named job-sheet fields sit between 0.75 and 0.9; table- and
    /// regex-derived fields between 0.7 and 0.95.
    #[must_use]
    pub fn built_in() -> Self {
        let entries = vec![
            ("job_number", "ocr", 0.85),
            ("customer_name", "ocr", 0.8),
            ("service_date", "ocr", 0.85),
            ("technician_name", "ocr", 0.75),
            ("customer_signature", "ocr", 0.9),
            ("technician_signature", "ocr", 0.9),
            ("parts_table", "table_parser", 0.7),
            ("labor_entries", "table_parser", 0.75),
            ("job_reference", "regex", 0.95),
            (WILDCARD_FIELD, "ocr", 0.8),
        ]
        .into_iter()
        .map(|(field, method, threshold)| CalibrationEntry {
            field_name: field.to_string(),
            method: method.to_string(),
            doc_type: "*".to_string(),
            threshold,
            weight: DEFAULT_WEIGHT,
        })
        .collect();

        Self::new(entries, DEFAULT_THRESHOLD, DEFAULT_WEIGHT)
            .unwrap_or_else(|_| Self::empty_with_defaults())
    }

    /// A table with no entries, resolving everything to the built-in
    /// defaults.
    #[must_use]
    pub fn empty_with_defaults() -> Self {
        Self {
            entries: BTreeMap::new(),
            default_threshold: DEFAULT_THRESHOLD,
            default_weight: DEFAULT_WEIGHT,
        }
    }

    /// Resolves the calibration for a field: exact match, then wildcard,
    /// then table defaults.
    #[must_use]
    pub fn resolve(&self, field_name: &str) -> Calibration {
        self.entries
            .get(field_name)
            .or_else(|| self.entries.get(WILDCARD_FIELD))
            .map_or(
                Calibration {
                    threshold: self.default_threshold,
                    weight: self.default_weight,
                },
                |entry| Calibration {
                    threshold: entry.threshold,
                    weight: entry.weight,
                },
            )
    }

    /// Number of explicit entries (wildcard included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table carries no explicit entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::built_in()
    }
}
