//! The reconciliation engine.
//!
//! # Invariants
//!
//! - Re-extraction requests are issued in lexicographic field-name order,
//!   regardless of the input array order.
//! - A re-extraction result replaces the original field only when it
//!   succeeded AND strictly improved confidence; otherwise the original is
//!   retained unchanged.
//! - The reconciled field list is always sorted by field name.
//! - No per-field failure propagates as an error from [`reconcile`]; the
//!   document-level result always returns, with `requires_review` raised
//!   whenever anything stayed below calibration or failed to improve.
//! - The merge tolerates partial result sets: a request with no recorded
//!   outcome counts as a failure.
//!
//! [`reconcile`]: ReconciliationEngine::reconcile

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::field::{BoundingBox, ExtractedField, FieldSource};
use super::provider::ExtractionProvider;
use crate::artifact::{self, ARTIFACT_SCHEMA_VERSION, ArtifactError, round_confidence};
use crate::calibration::CalibrationTable;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of fields accepted for one document.
pub const MAX_DOCUMENT_FIELDS: usize = 1_024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fail-fast input errors. Provider failures are NOT represented here; they
/// surface inside the result as failed outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReconcileError {
    /// The document identifier is empty.
    #[error("document id must not be empty (EMPTY_DOCUMENT_ID)")]
    EmptyDocumentId,

    /// Too many fields for one document.
    #[error("too many fields: {count} exceeds limit {limit}")]
    TooManyFields {
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Why a field was selected for re-extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ReExtractionReason {
    /// The field is required and its value is absent.
    MissingRequired,
    /// The field's confidence fell below its calibration threshold.
    BelowThreshold {
        /// The threshold that was not met.
        threshold: f64,
    },
}

/// A targeted re-extraction request, scoped to one field's bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReExtractionRequest {
    /// Document the field belongs to.
    pub document_id: String,
    /// Field to re-extract.
    pub field_name: String,
    /// Region to target.
    pub bbox: BoundingBox,
    /// Why the field was selected.
    #[serde(flatten)]
    pub reason: ReExtractionReason,
}

/// The recorded outcome of one re-extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReExtractionOutcome {
    /// Field the attempt targeted.
    pub field_name: String,
    /// Whether the provider call succeeded.
    pub success: bool,
    /// Re-extracted value, when any.
    pub value: Option<String>,
    /// Re-extraction confidence; `0.0` on failure.
    pub confidence: f64,
    /// Extraction path of the new value.
    pub source: FieldSource,
    /// Provider error detail on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Per-document reconciliation summary counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSummary {
    /// Fields in the final reconciled list.
    pub total_fields: usize,
    /// Merged fields whose confidence rose.
    pub fields_improved: usize,
    /// Fields that were never targeted.
    pub fields_unchanged: usize,
    /// Re-extraction attempts that did not improve confidence.
    pub fields_failed: usize,
    /// Mean confidence over the final reconciled list.
    pub average_confidence: f64,
    /// Reconciled fields still below their calibration threshold.
    pub low_confidence_count: usize,
}

/// The write-once result of reconciling one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    /// Document identifier.
    pub document_id: String,
    /// The input fields, untouched.
    pub original_fields: Vec<ExtractedField>,
    /// Requests issued, in lexicographic field-name order.
    pub re_extraction_requests: Vec<ReExtractionRequest>,
    /// Outcomes recorded for those requests.
    pub re_ocr_results: Vec<ReExtractionOutcome>,
    /// Final field list, merge of originals and improvements, name-sorted.
    pub reconciled_fields: Vec<ExtractedField>,
    /// Required fields whose value is still absent after the merge.
    pub missing_required_fields: Vec<String>,
    /// Summary counters.
    pub summary: ReconciliationSummary,
    /// Whether the document needs a human look.
    pub requires_review: bool,
    /// Human-readable reasons backing `requires_review`.
    pub review_reasons: Vec<String>,
}

impl ReconciliationResult {
    /// Renders the byte-stable canonical artifact for the parity harness.
    ///
    /// Confidences are rounded to two decimal places and field lists are
    /// sorted by field name; the rendering carries a fixed `schemaVersion`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if serialization fails.
    pub fn canonical_artifact(&self) -> Result<String, ArtifactError> {
        let mut fields: Vec<FieldArtifact<'_>> = self
            .reconciled_fields
            .iter()
            .map(|f| FieldArtifact {
                field_name: &f.field_name,
                value: f.value.as_deref(),
                confidence: round_confidence(f.confidence),
                source: f.source,
            })
            .collect();
        fields.sort_by(|a, b| a.field_name.cmp(b.field_name));

        let artifact = ReconciliationArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            document_id: &self.document_id,
            reconciled_fields: fields,
            missing_required_fields: &self.missing_required_fields,
            summary: SummaryArtifact {
                total_fields: self.summary.total_fields,
                fields_improved: self.summary.fields_improved,
                fields_unchanged: self.summary.fields_unchanged,
                fields_failed: self.summary.fields_failed,
                average_confidence: round_confidence(self.summary.average_confidence),
                low_confidence_count: self.summary.low_confidence_count,
            },
            requires_review: self.requires_review,
            review_reasons: &self.review_reasons,
        };
        artifact::to_canonical_json(&artifact)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconciliationArtifact<'a> {
    schema_version: &'static str,
    document_id: &'a str,
    reconciled_fields: Vec<FieldArtifact<'a>>,
    missing_required_fields: &'a [String],
    summary: SummaryArtifact,
    requires_review: bool,
    review_reasons: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldArtifact<'a> {
    field_name: &'a str,
    value: Option<&'a str>,
    confidence: f64,
    source: FieldSource,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryArtifact {
    total_fields: usize,
    fields_improved: usize,
    fields_unchanged: usize,
    fields_failed: usize,
    average_confidence: f64,
    low_confidence_count: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The reconciliation engine. Holds the provider seam; everything else is a
/// pure function of the call inputs.
pub struct ReconciliationEngine {
    provider: Arc<dyn ExtractionProvider + Send + Sync>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine").finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Creates an engine over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn ExtractionProvider + Send + Sync>) -> Self {
        Self { provider }
    }

    /// Reconciles one document's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] only for fail-fast input problems (empty
    /// document id, field count over [`MAX_DOCUMENT_FIELDS`]). Provider
    /// failures are captured per field inside the result.
    pub fn reconcile(
        &self,
        document_id: &str,
        fields: &[ExtractedField],
        required_field_names: &[String],
        calibration: &CalibrationTable,
    ) -> Result<ReconciliationResult, ReconcileError> {
        if document_id.trim().is_empty() {
            return Err(ReconcileError::EmptyDocumentId);
        }
        if fields.len() > MAX_DOCUMENT_FIELDS {
            return Err(ReconcileError::TooManyFields {
                count: fields.len(),
                limit: MAX_DOCUMENT_FIELDS,
            });
        }

        let required: BTreeSet<&str> = required_field_names.iter().map(String::as_str).collect();

        // Candidate selection, then lexicographic ordering so the request
        // stream is deterministic whatever order the fields arrived in.
        let mut requests: Vec<ReExtractionRequest> = fields
            .iter()
            .filter_map(|field| {
                let reason = candidate_reason(field, &required, calibration)?;
                let bbox = field.bbox?;
                Some(ReExtractionRequest {
                    document_id: document_id.to_string(),
                    field_name: field.field_name.clone(),
                    bbox,
                    reason,
                })
            })
            .collect();
        requests.sort_by(|a, b| a.field_name.cmp(&b.field_name));

        tracing::debug!(
            document_id,
            candidates = requests.len(),
            total_fields = fields.len(),
            "issuing re-extraction requests"
        );

        let outcomes: Vec<ReExtractionOutcome> = requests
            .iter()
            .map(|request| match self.provider.re_extract(request) {
                Ok(extraction) => ReExtractionOutcome {
                    field_name: request.field_name.clone(),
                    success: true,
                    value: extraction.value,
                    confidence: extraction.confidence,
                    source: extraction.source,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(
                        document_id,
                        field = %request.field_name,
                        error = %err,
                        "re-extraction failed"
                    );
                    ReExtractionOutcome {
                        field_name: request.field_name.clone(),
                        success: false,
                        value: None,
                        confidence: 0.0,
                        source: FieldSource::Reocr,
                        error: Some(err.to_string()),
                    }
                },
            })
            .collect();

        Ok(merge(
            document_id,
            fields,
            &required,
            &requests,
            outcomes,
            calibration,
        ))
    }
}

/// Decides whether a field is a re-extraction candidate. Fields without a
/// bounding box never qualify — there is nothing to target.
fn candidate_reason(
    field: &ExtractedField,
    required: &BTreeSet<&str>,
    calibration: &CalibrationTable,
) -> Option<ReExtractionReason> {
    field.bbox?;
    if required.contains(field.field_name.as_str()) && field.value.is_none() {
        return Some(ReExtractionReason::MissingRequired);
    }
    let threshold = calibration.resolve(&field.field_name).threshold;
    if field.confidence < threshold {
        return Some(ReExtractionReason::BelowThreshold { threshold });
    }
    None
}

/// Merges re-extraction outcomes into the original field list and computes
/// the summary. Pure; insensitive to the order outcomes were produced in,
/// and tolerant of outcomes missing for some requests.
fn merge(
    document_id: &str,
    fields: &[ExtractedField],
    required: &BTreeSet<&str>,
    requests: &[ReExtractionRequest],
    outcomes: Vec<ReExtractionOutcome>,
    calibration: &CalibrationTable,
) -> ReconciliationResult {
    let outcome_by_name: BTreeMap<&str, &ReExtractionOutcome> = outcomes
        .iter()
        .map(|o| (o.field_name.as_str(), o))
        .collect();
    let targeted: BTreeSet<&str> = requests.iter().map(|r| r.field_name.as_str()).collect();

    let mut fields_improved = 0usize;
    let mut reconciled: Vec<ExtractedField> = fields
        .iter()
        .map(|field| {
            let improved = outcome_by_name
                .get(field.field_name.as_str())
                .filter(|o| o.success && o.confidence > field.confidence);
            match improved {
                Some(outcome) => {
                    fields_improved += 1;
                    ExtractedField {
                        field_name: field.field_name.clone(),
                        value: outcome.value.clone(),
                        confidence: outcome.confidence,
                        source: outcome.source,
                        bbox: field.bbox,
                    }
                },
                None => field.clone(),
            }
        })
        .collect();
    reconciled.sort_by(|a, b| a.field_name.cmp(&b.field_name));

    let total_fields = reconciled.len();
    let fields_unchanged = reconciled
        .iter()
        .filter(|f| !targeted.contains(f.field_name.as_str()))
        .count();
    let fields_failed = requests.len().saturating_sub(fields_improved);

    let average_confidence = if reconciled.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let len = reconciled.len() as f64;
        reconciled.iter().map(|f| f.confidence).sum::<f64>() / len
    };
    let low_confidence_count = reconciled
        .iter()
        .filter(|f| f.confidence < calibration.resolve(&f.field_name).threshold)
        .count();

    let missing_required_fields: Vec<String> = {
        let present: BTreeMap<&str, bool> = reconciled
            .iter()
            .map(|f| (f.field_name.as_str(), f.value.is_some()))
            .collect();
        required
            .iter()
            .filter(|name| !present.get(*name).copied().unwrap_or(false))
            .map(ToString::to_string)
            .collect()
    };

    let mut review_reasons = Vec::new();
    if !missing_required_fields.is_empty() {
        review_reasons.push(format!(
            "{} required field(s) still missing: {}",
            missing_required_fields.len(),
            missing_required_fields.join(", ")
        ));
    }
    if fields_failed > 0 {
        review_reasons.push(format!(
            "{fields_failed} re-extraction attempt(s) did not improve confidence"
        ));
    }
    if low_confidence_count > 0 {
        review_reasons.push(format!(
            "{low_confidence_count} field(s) below calibration threshold"
        ));
    }
    let requires_review = low_confidence_count > 0 || fields_failed > 0;

    ReconciliationResult {
        document_id: document_id.to_string(),
        original_fields: fields.to_vec(),
        re_extraction_requests: requests.to_vec(),
        re_ocr_results: outcomes,
        reconciled_fields: reconciled,
        missing_required_fields,
        summary: ReconciliationSummary {
            total_fields,
            fields_improved,
            fields_unchanged,
            fields_failed,
            average_confidence,
            low_confidence_count,
        },
        requires_review,
        review_reasons,
    }
}
