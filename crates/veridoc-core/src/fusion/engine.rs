//! The fusion engine and its decision table.
//!
//! # Decision Table
//!
//! Evaluated in this priority order for `fuse(field, ocr, image_qa)`:
//!
//! 1. Both sources absent -> `MISSING_FIELD`, confidence 0, value null.
//! 2. Only one source present -> adopt that source's value/presence and
//!    confidence verbatim; `VALID` when the confidence clears the
//!    minimum-valid threshold, `LOW_CONFIDENCE` otherwise (the value still
//!    surfaces).
//! 3. Both present, presence agrees, both confidences high -> `VALID`; the
//!    fused confidence is at least the maximum of the two inputs (agreement
//!    earns a small bonus, capped at 1).
//! 4. Both present, both confidences low -> `LOW_CONFIDENCE`.
//! 5. Both present, both confidences high, presence disagrees -> `CONFLICT`.
//! 6. Both present, exactly one high-confidence, presence disagrees -> the
//!    high-confidence source is trusted for value and confidence, but the
//!    outcome stays `LOW_CONFIDENCE` so every disagreement leaves a visible
//!    review trail. The reason names the trusted source.
//! 7. Both present, presence agrees, exactly one high-confidence ->
//!    `LOW_CONFIDENCE`; agreement without strong corroboration is not
//!    promoted to `VALID`.
//!
//! Case 6 is deliberately conservative: even a fully confident trusted
//! source never yields `VALID` when the other source disagreed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::{self, ARTIFACT_SCHEMA_VERSION, ArtifactError, round_confidence};
use crate::crypto::{encode_hex, hash_components};
use crate::reconcile::{BoundingBox, FieldSource};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default minimum confidence for a single-source result to count as valid.
pub const DEFAULT_MIN_VALID_CONFIDENCE: f64 = 0.6;

/// Default threshold above which a source counts as high-confidence.
pub const DEFAULT_HIGH_CONFIDENCE: f64 = 0.8;

/// Confidence bonus applied when both high-confidence sources agree.
pub const AGREEMENT_BONUS: f64 = 0.05;

/// Domain separator for crop-reference hashes.
pub const CROP_HASH_DOMAIN: &str = "veridoc.fusion.crop_ref.v1";

/// The fixed registry of fields that require joint OCR + image inspection.
/// Kept sorted by field identifier; batch fusion walks it in this order.
pub const JOINT_INSPECTION_FIELDS: &[&str] = &[
    "completion_tickboxes",
    "customer_signature",
    "safety_checklist",
    "technician_signature",
];

/// Whether a field is fused at all. Everything else bypasses fusion and is
/// resolved by extraction plus reconciliation alone.
#[must_use]
pub fn requires_joint_inspection(field_id: &str) -> bool {
    JOINT_INSPECTION_FIELDS.contains(&field_id)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds governing the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct FusionConfig {
    /// Minimum confidence for a single-source result to be `VALID`.
    pub min_valid_confidence: f64,
    /// Threshold at or above which a source counts as high-confidence.
    pub high_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_valid_confidence: DEFAULT_MIN_VALID_CONFIDENCE,
            high_confidence: DEFAULT_HIGH_CONFIDENCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Source results
// ---------------------------------------------------------------------------

/// The OCR-derived judgment of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrFieldResult {
    /// Whether text extraction found the field.
    pub extracted: bool,
    /// Extracted value, when any.
    pub value: Option<String>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which extraction path produced the value.
    pub source: FieldSource,
}

/// The image-inspection judgment of one field region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageQaFieldResult {
    /// Whether visual inspection found the field present.
    pub present: bool,
    /// Inspection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Image quality score in `[0, 1]`.
    pub quality: f64,
    /// Quality issues observed (e.g. `"blur"`, `"low_contrast"`).
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Fused results
// ---------------------------------------------------------------------------

/// The authoritative per-field verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusedOutcome {
    /// Sources agree (or a lone source is confident enough).
    Valid,
    /// The evidence is too weak, or a disagreement was resolved by trust.
    LowConfidence,
    /// High-confidence sources contradict each other.
    Conflict,
    /// Neither source produced a result.
    MissingField,
}

/// Document-level rollup of fused outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallOutcome {
    /// Every fused field is valid.
    Valid,
    /// At least one field needs a human look.
    ReviewRequired,
    /// At least one field conflicted.
    Conflict,
}

/// Evidence metadata pointing at the document region a fused decision is
/// based on. Purely descriptive; never authoritative data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropReference {
    /// Stable region identifier.
    pub region_id: String,
    /// The region itself.
    pub bbox: BoundingBox,
    /// Deterministic hash over `{document_id, field_id, bbox}`. No pixel
    /// content reaches this layer, so the hash identifies the request, not
    /// the image bytes.
    pub crop_hash: String,
    /// Host-supplied extraction timestamp, milliseconds since the epoch.
    /// The engine never samples wall-clock time itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at_ms: Option<u64>,
}

/// The fused verdict for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedFieldResult {
    /// Field identifier.
    pub field_id: String,
    /// The verdict.
    pub fused_outcome: FusedOutcome,
    /// Fused confidence in `[0, 1]`.
    pub fused_confidence: f64,
    /// Fused value, when any source supplied one.
    pub fused_value: Option<String>,
    /// Human-readable account of which decision-table case applied.
    pub fusion_reason: String,
    /// Evidence crop reference, when a region was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_reference: Option<CropReference>,
}

/// The write-once result of batch fusion over one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionEvidence {
    /// Document identifier.
    pub document_id: String,
    /// Per-field verdicts, sorted by field identifier.
    pub fields: Vec<FusedFieldResult>,
    /// Document-level rollup.
    pub overall_outcome: OverallOutcome,
}

impl FusionEvidence {
    /// Renders the byte-stable canonical artifact for the parity harness.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if serialization fails.
    pub fn canonical_artifact(&self) -> Result<String, ArtifactError> {
        let mut fields: Vec<FusedFieldArtifact<'_>> = self
            .fields
            .iter()
            .map(|f| FusedFieldArtifact {
                field_id: &f.field_id,
                fused_outcome: f.fused_outcome,
                fused_confidence: round_confidence(f.fused_confidence),
                fused_value: f.fused_value.as_deref(),
                fusion_reason: &f.fusion_reason,
                crop_reference: f.crop_reference.as_ref(),
            })
            .collect();
        fields.sort_by(|a, b| a.field_id.cmp(b.field_id));

        let artifact = FusionArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            document_id: &self.document_id,
            fields,
            overall_outcome: self.overall_outcome,
        };
        artifact::to_canonical_json(&artifact)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FusionArtifact<'a> {
    schema_version: &'static str,
    document_id: &'a str,
    fields: Vec<FusedFieldArtifact<'a>>,
    overall_outcome: OverallOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FusedFieldArtifact<'a> {
    field_id: &'a str,
    fused_outcome: FusedOutcome,
    fused_confidence: f64,
    fused_value: Option<&'a str>,
    fusion_reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    crop_reference: Option<&'a CropReference>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The fusion engine. Stateless apart from its thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    /// Creates an engine with the given thresholds.
    #[must_use]
    pub const fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Returns the governing thresholds.
    #[must_use]
    pub const fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuses the two judgments of one field. See the module docs for the
    /// decision table.
    #[must_use]
    pub fn fuse(
        &self,
        field_id: &str,
        ocr: Option<&OcrFieldResult>,
        image_qa: Option<&ImageQaFieldResult>,
        roi_bbox: Option<BoundingBox>,
        document_id: Option<&str>,
    ) -> FusedFieldResult {
        let (fused_outcome, fused_confidence, fused_value, fusion_reason) =
            match (ocr, image_qa) {
                (None, None) => (
                    FusedOutcome::MissingField,
                    0.0,
                    None,
                    "no OCR or image-inspection result for field".to_string(),
                ),
                (Some(o), None) => self.single_source(
                    "OCR",
                    o.confidence,
                    o.value.clone(),
                    o.extracted,
                ),
                (None, Some(q)) => self.single_source(
                    "image inspection",
                    q.confidence,
                    None,
                    q.present,
                ),
                (Some(o), Some(q)) => self.fuse_both(o, q),
            };

        if fused_outcome == FusedOutcome::Conflict {
            tracing::debug!(field = field_id, reason = %fusion_reason, "fusion conflict");
        }

        FusedFieldResult {
            field_id: field_id.to_string(),
            fused_outcome,
            fused_confidence,
            fused_value,
            fusion_reason,
            crop_reference: roi_bbox
                .map(|bbox| crop_reference(document_id.unwrap_or(""), field_id, bbox)),
        }
    }

    /// Runs single-field fusion over the joint-inspection registry, sorted
    /// by field identifier, and rolls the outcomes up.
    ///
    /// The rollup is `CONFLICT` if any field conflicted, else
    /// `REVIEW_REQUIRED` if any field is low-confidence or missing, else
    /// `VALID`. A missing registry field (an absent signature block, say)
    /// always demands review — the engine never reports a clean document on
    /// missing evidence.
    #[must_use]
    pub fn fuse_all(
        &self,
        document_id: &str,
        ocr_results: &BTreeMap<String, OcrFieldResult>,
        image_qa_results: &BTreeMap<String, ImageQaFieldResult>,
        roi_bboxes: &BTreeMap<String, BoundingBox>,
    ) -> FusionEvidence {
        let mut field_ids: Vec<&str> = JOINT_INSPECTION_FIELDS.to_vec();
        field_ids.sort_unstable();

        let fields: Vec<FusedFieldResult> = field_ids
            .into_iter()
            .map(|field_id| {
                self.fuse(
                    field_id,
                    ocr_results.get(field_id),
                    image_qa_results.get(field_id),
                    roi_bboxes.get(field_id).copied(),
                    Some(document_id),
                )
            })
            .collect();

        let overall_outcome = if fields
            .iter()
            .any(|f| f.fused_outcome == FusedOutcome::Conflict)
        {
            OverallOutcome::Conflict
        } else if fields.iter().any(|f| {
            matches!(
                f.fused_outcome,
                FusedOutcome::LowConfidence | FusedOutcome::MissingField
            )
        }) {
            OverallOutcome::ReviewRequired
        } else {
            OverallOutcome::Valid
        };

        FusionEvidence {
            document_id: document_id.to_string(),
            fields,
            overall_outcome,
        }
    }

    /// Case 2: one source present.
    fn single_source(
        &self,
        source_name: &str,
        confidence: f64,
        value: Option<String>,
        detected: bool,
    ) -> (FusedOutcome, f64, Option<String>, String) {
        let detected_text = if detected { "detected" } else { "not detected" };
        if confidence >= self.config.min_valid_confidence {
            (
                FusedOutcome::Valid,
                confidence,
                value,
                format!("single source ({source_name}): field {detected_text} at {confidence:.2}"),
            )
        } else {
            (
                FusedOutcome::LowConfidence,
                confidence,
                value,
                format!(
                    "single source ({source_name}) below minimum valid confidence \
                     ({confidence:.2} < {:.2})",
                    self.config.min_valid_confidence
                ),
            )
        }
    }

    /// Cases 3 through 7: both sources present.
    fn fuse_both(
        &self,
        ocr: &OcrFieldResult,
        qa: &ImageQaFieldResult,
    ) -> (FusedOutcome, f64, Option<String>, String) {
        let agree = ocr.extracted == qa.present;
        let ocr_high = ocr.confidence >= self.config.high_confidence;
        let qa_high = qa.confidence >= self.config.high_confidence;

        if agree && ocr_high && qa_high {
            // Case 3: high-confidence agreement.
            let fused = (ocr.confidence.max(qa.confidence) + AGREEMENT_BONUS).min(1.0);
            return (
                FusedOutcome::Valid,
                fused,
                ocr.value.clone(),
                format!(
                    "OCR ({:.2}) and image inspection ({:.2}) agree with high confidence",
                    ocr.confidence, qa.confidence
                ),
            );
        }

        if !ocr_high && !qa_high {
            // Case 4: nothing trustworthy on either side.
            let fused = (ocr.confidence + qa.confidence) / 2.0;
            return (
                FusedOutcome::LowConfidence,
                fused,
                ocr.value.clone(),
                format!(
                    "both sources below high-confidence threshold \
                     (OCR {:.2}, image inspection {:.2})",
                    ocr.confidence, qa.confidence
                ),
            );
        }

        if !agree && ocr_high && qa_high {
            // Case 5: confident contradiction.
            return (
                FusedOutcome::Conflict,
                ocr.confidence.min(qa.confidence),
                ocr.value.clone(),
                format!(
                    "high-confidence disagreement: OCR reports extracted={} ({:.2}), \
                     image inspection reports present={} ({:.2})",
                    ocr.extracted, ocr.confidence, qa.present, qa.confidence
                ),
            );
        }

        if !agree {
            // Case 6: one confident source overrides the other, but the
            // disagreement itself caps the outcome at LOW_CONFIDENCE.
            if ocr_high {
                return (
                    FusedOutcome::LowConfidence,
                    ocr.confidence,
                    ocr.value.clone(),
                    format!(
                        "trusting OCR ({:.2}) over image inspection ({:.2}): sources disagree",
                        ocr.confidence, qa.confidence
                    ),
                );
            }
            return (
                FusedOutcome::LowConfidence,
                qa.confidence,
                None,
                format!(
                    "trusting image inspection ({:.2}) over OCR ({:.2}): sources disagree",
                    qa.confidence, ocr.confidence
                ),
            );
        }

        // Case 7: agreement without strong corroboration.
        (
            FusedOutcome::LowConfidence,
            ocr.confidence.max(qa.confidence),
            ocr.value.clone(),
            format!(
                "sources agree but only one is high-confidence \
                 (OCR {:.2}, image inspection {:.2})",
                ocr.confidence, qa.confidence
            ),
        )
    }
}

/// Builds the deterministic crop reference for a fused field.
fn crop_reference(document_id: &str, field_id: &str, bbox: BoundingBox) -> CropReference {
    let bbox_canonical = artifact::to_canonical_json(&bbox).unwrap_or_default();
    let crop_hash = encode_hex(&hash_components(
        CROP_HASH_DOMAIN,
        &[
            document_id.as_bytes(),
            field_id.as_bytes(),
            bbox_canonical.as_bytes(),
        ],
    ));
    CropReference {
        region_id: format!("{field_id}:p{}", bbox.page),
        bbox,
        crop_hash,
        extracted_at_ms: None,
    }
}
