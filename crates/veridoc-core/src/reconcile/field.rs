//! Extracted field records.

use serde::{Deserialize, Serialize};

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// First-pass full-document extraction.
    Primary,
    /// Targeted re-extraction of a document region.
    Reocr,
    /// Structured table parsing.
    TableParser,
    /// Pattern-based extraction.
    Regex,
    /// Last-resort heuristic.
    Fallback,
}

/// A rectangular document region, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Region width.
    pub width: f64,
    /// Region height.
    pub height: f64,
    /// Zero-based page index.
    pub page: u32,
}

/// One confidence-scored field extraction.
///
/// Produced once by a provider call and never mutated; reconciliation builds
/// new field records rather than editing originals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedField {
    /// Field name, unique within a document.
    pub field_name: String,
    /// Extracted value, absent when the provider found nothing.
    pub value: Option<String>,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which extraction path produced the value.
    pub source: FieldSource,
    /// Region the value was read from, when the provider localized it.
    /// A field without a bounding box can never be re-extracted — there is
    /// nothing to target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl ExtractedField {
    /// Convenience constructor for a primary-extracted field.
    #[must_use]
    pub fn primary(
        field_name: impl Into<String>,
        value: Option<String>,
        confidence: f64,
        bbox: Option<BoundingBox>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            value,
            confidence,
            source: FieldSource::Primary,
            bbox,
        }
    }
}
