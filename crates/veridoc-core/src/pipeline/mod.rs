//! The document resolution pipeline.
//!
//! [`DocumentResolver`] is the top-level orchestrator: it owns the cache,
//! the calibration table, both engines, and the performance tracker, with
//! the extraction provider injected at construction. Control flow per
//! document:
//!
//! 1. Hash the document bytes and template configuration.
//! 2. Derive the cache key and probe the cache — a hit returns the stored
//!    payload verbatim.
//! 3. On a miss, run reconciliation and fusion over the provider outputs,
//!    derive review routing, and assemble the canonical payload.
//! 4. Store the payload under the derived key and return it.
//!
//! Each resolver instance processes documents one at a time; run several
//! resolvers over a shared [`ResultCache`] for concurrent workers. Provider
//! failures never escape [`DocumentResolver::resolve`] — they surface as
//! review reasons inside the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::artifact::{ARTIFACT_SCHEMA_VERSION, ArtifactError, to_canonical_json};
use crate::cache::{CacheKeyComponents, CacheKeyError, CacheStats, ResultCache};
use crate::calibration::CalibrationTable;
use crate::config::{ConfigError, EngineConfig};
use crate::crypto::{ContentHasher, TemplateHashError, encode_hex};
use crate::fusion::{FusionEngine, ImageQaFieldResult, OcrFieldResult};
use crate::metrics::{PerformanceSnapshot, PerformanceTracker};
use crate::reconcile::{
    BoundingBox, ExtractedField, ExtractionProvider, ReconcileError, ReconciliationEngine,
};
use crate::review::{route_fusion, route_reconciliation};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fail-fast errors from document resolution.
///
/// Provider failures are never represented here; they are recovered locally
/// and surface as review reasons.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The document has no pages or no bytes (`NO_PAGES`).
    #[error("document {document_id} has no pages (NO_PAGES)")]
    NoPages {
        /// Offending document.
        document_id: String,
    },

    /// The document identifier is empty (`EMPTY_DOCUMENT_ID`).
    #[error("document id must not be empty (EMPTY_DOCUMENT_ID)")]
    EmptyDocumentId,

    /// The template configuration could not be hashed.
    #[error(transparent)]
    Template(#[from] TemplateHashError),

    /// Cache key components were malformed.
    #[error(transparent)]
    Key(#[from] CacheKeyError),

    /// Reconciliation rejected its inputs.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Artifact serialization failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl ResolveError {
    /// Machine-readable error code for wire surfaces and audit records.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoPages { .. } => "NO_PAGES",
            Self::EmptyDocumentId => "EMPTY_DOCUMENT_ID",
            Self::Template(_) => "TEMPLATE_UNSERIALIZABLE",
            Self::Key(_) => "INVALID_KEY_COMPONENTS",
            Self::Reconcile(_) => "INVALID_RECONCILE_INPUT",
            Self::Artifact(_) => "ARTIFACT_SERIALIZATION",
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One document presented for resolution.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Document identifier.
    pub document_id: String,
    /// Raw scanned file bytes.
    pub file_bytes: Vec<u8>,
    /// Number of pages in the scan.
    pub page_count: u32,
    /// The template configuration chosen for this document.
    pub template: Value,
}

/// Provider outputs for one document, fetched by the host before resolution.
#[derive(Debug, Clone, Default)]
pub struct DocumentExtraction {
    /// Primary-extracted fields.
    pub fields: Vec<ExtractedField>,
    /// Names of fields the template marks as required.
    pub required_fields: Vec<String>,
    /// OCR judgments for joint-inspection fields.
    pub ocr_results: BTreeMap<String, OcrFieldResult>,
    /// Image-inspection judgments for joint-inspection fields.
    pub image_qa_results: BTreeMap<String, ImageQaFieldResult>,
    /// Regions of interest for joint-inspection fields.
    pub roi_bboxes: BTreeMap<String, BoundingBox>,
}

/// The resolved outcome for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDocument {
    /// Document identifier from the input.
    pub document_id: String,
    /// Whether the payload came from the cache.
    pub from_cache: bool,
    /// Hex rendering of the derived cache key.
    pub cache_key: String,
    /// The full result payload: reconciliation, fusion evidence, and review
    /// routing under a fixed schema version.
    pub payload: Value,
}

impl ResolvedDocument {
    /// Renders the payload canonically for storage and parity diffing.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if serialization fails.
    pub fn canonical_json(&self) -> Result<String, ArtifactError> {
        to_canonical_json(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// The pipeline orchestrator.
pub struct DocumentResolver {
    config: EngineConfig,
    calibration: CalibrationTable,
    cache: Arc<ResultCache>,
    reconciliation: ReconciliationEngine,
    fusion: FusionEngine,
    tracker: PerformanceTracker,
}

impl std::fmt::Debug for DocumentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DocumentResolver {
    /// Creates a resolver over an explicitly constructed cache and provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration or its calibration
    /// section fails validation.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ExtractionProvider + Send + Sync>,
        cache: Arc<ResultCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let calibration = config.build_calibration()?;
        let fusion = FusionEngine::new(config.fusion_config());
        Ok(Self {
            config,
            calibration,
            cache,
            reconciliation: ReconciliationEngine::new(provider),
            fusion,
            tracker: PerformanceTracker::new(),
        })
    }

    /// Resolves one document: cache probe, then reconciliation + fusion on a
    /// miss.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] only for fail-fast input problems; provider
    /// failures surface as review reasons inside the payload.
    pub fn resolve(
        &mut self,
        input: &DocumentInput,
        extraction: &DocumentExtraction,
    ) -> Result<ResolvedDocument, ResolveError> {
        if input.document_id.trim().is_empty() {
            return Err(ResolveError::EmptyDocumentId);
        }
        if input.page_count == 0 || input.file_bytes.is_empty() {
            return Err(ResolveError::NoPages {
                document_id: input.document_id.clone(),
            });
        }

        let file_hash = encode_hex(&ContentHasher::hash_bytes(&input.file_bytes));
        let template_hash = encode_hex(&ContentHasher::hash_template(&input.template)?);
        let components = CacheKeyComponents::new(
            file_hash,
            template_hash,
            self.config.engine_versions.clone(),
        )?;
        let key = components.derive_key();

        if let Some(payload) = self.cache.get(&key) {
            tracing::debug!(document_id = %input.document_id, key = %key, "cache hit");
            self.tracker.record_cache_hit();
            return Ok(ResolvedDocument {
                document_id: input.document_id.clone(),
                from_cache: true,
                cache_key: key.to_hex(),
                payload,
            });
        }
        tracing::debug!(document_id = %input.document_id, key = %key, "cache miss");

        let reconciliation = self.reconciliation.reconcile(
            &input.document_id,
            &extraction.fields,
            &extraction.required_fields,
            &self.calibration,
        )?;
        let evidence = self.fusion.fuse_all(
            &input.document_id,
            &extraction.ocr_results,
            &extraction.image_qa_results,
            &extraction.roi_bboxes,
        );
        let routing = route_reconciliation(&reconciliation).merge(route_fusion(&evidence));

        self.tracker.record_cache_miss(
            u64::from(input.page_count),
            reconciliation.reconciled_fields.len() as u64,
            reconciliation.re_extraction_requests.len() as u64,
        );

        let payload = build_payload(
            &input.document_id,
            &reconciliation.canonical_artifact()?,
            &evidence.canonical_artifact()?,
            &routing,
        )?;

        self.cache.set(key, payload.clone(), components);

        Ok(ResolvedDocument {
            document_id: input.document_id.clone(),
            from_cache: false,
            cache_key: key.to_hex(),
            payload,
        })
    }

    /// Snapshot of the performance counters.
    #[must_use]
    pub const fn performance(&self) -> PerformanceSnapshot {
        self.tracker.snapshot()
    }

    /// Statistics from the shared cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The calibration table in effect.
    #[must_use]
    pub const fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }
}

/// Assembles the cacheable payload from the canonical artifact renderings,
/// so the stored trees carry exactly the rounded, sorted content the parity
/// harness diffs.
fn build_payload(
    document_id: &str,
    reconciliation_artifact: &str,
    fusion_artifact: &str,
    routing: &crate::review::ReviewRouting,
) -> Result<Value, ArtifactError> {
    let parse = |artifact: &str| -> Result<Value, ArtifactError> {
        serde_json::from_str(artifact).map_err(|e| ArtifactError::Serialization {
            message: e.to_string(),
        })
    };
    let routing_tree = serde_json::to_value(routing).map_err(|e| ArtifactError::Serialization {
        message: e.to_string(),
    })?;
    Ok(serde_json::json!({
        "schemaVersion": ARTIFACT_SCHEMA_VERSION,
        "documentId": document_id,
        "reconciliation": parse(reconciliation_artifact)?,
        "fusionEvidence": parse(fusion_artifact)?,
        "routing": routing_tree,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{JOINT_INSPECTION_FIELDS, OverallOutcome};
    use crate::reconcile::{FieldSource, ScriptedProvider};

    fn bbox() -> BoundingBox {
        BoundingBox {
            x: 5.0,
            y: 5.0,
            width: 80.0,
            height: 14.0,
            page: 0,
        }
    }

    fn resolver(provider: ScriptedProvider) -> DocumentResolver {
        DocumentResolver::new(
            EngineConfig::default(),
            Arc::new(provider),
            Arc::new(ResultCache::with_defaults()),
        )
        .expect("valid default config")
    }

    fn input(document_id: &str, bytes: &[u8]) -> DocumentInput {
        DocumentInput {
            document_id: document_id.to_string(),
            file_bytes: bytes.to_vec(),
            page_count: 2,
            template: serde_json::json!({ "name": "T", "version": 1 }),
        }
    }

    fn extraction() -> DocumentExtraction {
        let mut ocr_results = BTreeMap::new();
        let mut image_qa_results = BTreeMap::new();
        let mut roi_bboxes = BTreeMap::new();
        for field in JOINT_INSPECTION_FIELDS {
            ocr_results.insert(
                (*field).to_string(),
                OcrFieldResult {
                    extracted: true,
                    value: Some("present".to_string()),
                    confidence: 0.9,
                    source: FieldSource::Primary,
                },
            );
            image_qa_results.insert(
                (*field).to_string(),
                ImageQaFieldResult {
                    present: true,
                    confidence: 0.9,
                    quality: 0.85,
                    issues: Vec::new(),
                },
            );
            roi_bboxes.insert((*field).to_string(), bbox());
        }
        DocumentExtraction {
            fields: vec![ExtractedField::primary(
                "job_number",
                Some("JOB-42".to_string()),
                0.97,
                Some(bbox()),
            )],
            required_fields: vec!["job_number".to_string()],
            ocr_results,
            image_qa_results,
            roi_bboxes,
        }
    }

    // --- Input validation ---

    #[test]
    fn empty_document_id_rejected() {
        let err = resolver(ScriptedProvider::new())
            .resolve(&input("  ", b"bytes"), &extraction())
            .expect_err("must fail");
        assert!(matches!(err, ResolveError::EmptyDocumentId));
    }

    #[test]
    fn zero_pages_rejected_with_no_pages() {
        let mut doc = input("doc-1", b"bytes");
        doc.page_count = 0;
        let err = resolver(ScriptedProvider::new())
            .resolve(&doc, &extraction())
            .expect_err("must fail");
        assert!(matches!(err, ResolveError::NoPages { .. }));
        assert_eq!(err.code(), "NO_PAGES");
        assert!(err.to_string().contains("NO_PAGES"));
    }

    #[test]
    fn empty_bytes_rejected_with_no_pages() {
        let err = resolver(ScriptedProvider::new())
            .resolve(&input("doc-1", b""), &extraction())
            .expect_err("must fail");
        assert!(matches!(err, ResolveError::NoPages { .. }));
    }

    // --- Cache round trip ---

    #[test]
    fn second_resolve_hits_cache_byte_identically() {
        let mut resolver = resolver(ScriptedProvider::new());
        let doc = input("doc-123", b"scanned bytes A");

        let first = resolver.resolve(&doc, &extraction()).expect("resolve");
        assert!(!first.from_cache);

        let second = resolver.resolve(&doc, &extraction()).expect("resolve");
        assert!(second.from_cache);
        assert_eq!(first.payload, second.payload);
        assert_eq!(
            first.canonical_json().expect("canonical"),
            second.canonical_json().expect("canonical")
        );

        let perf = resolver.performance();
        assert_eq!(perf.cache_hits, 1);
        assert_eq!(perf.cache_misses, 1);
    }

    #[test]
    fn template_change_recomputes() {
        let mut resolver = resolver(ScriptedProvider::new());
        let doc = input("doc-1", b"same bytes");
        let _ = resolver.resolve(&doc, &extraction()).expect("resolve");

        let mut other = doc;
        other.template = serde_json::json!({ "name": "T", "version": 2 });
        let second = resolver.resolve(&other, &extraction()).expect("resolve");
        assert!(!second.from_cache, "template identity is part of the key");
    }

    // --- Payload content ---

    #[test]
    fn payload_carries_all_sections() {
        let mut resolver = resolver(ScriptedProvider::new());
        let result = resolver
            .resolve(&input("doc-1", b"bytes"), &extraction())
            .expect("resolve");

        assert_eq!(result.payload["schemaVersion"], ARTIFACT_SCHEMA_VERSION);
        assert_eq!(result.payload["documentId"], "doc-1");
        assert!(result.payload["reconciliation"].is_object());
        assert!(result.payload["fusionEvidence"].is_object());
        assert!(result.payload["routing"].is_object());
    }

    #[test]
    fn provider_failure_becomes_review_reason_not_error() {
        // A weak field triggers re-extraction; the scripted provider has no
        // response, so the attempt fails and must surface as routing data.
        let mut ext = extraction();
        ext.fields.push(ExtractedField::primary(
            "customer_name",
            Some("AC".to_string()),
            0.3,
            Some(bbox()),
        ));
        let mut resolver = resolver(ScriptedProvider::new());
        let result = resolver
            .resolve(&input("doc-1", b"bytes"), &ext)
            .expect("provider failure must not error");

        let routing = &result.payload["routing"];
        assert_eq!(routing["shouldRoute"], true);
        let codes: Vec<String> = routing["reasons"]
            .as_array()
            .expect("reasons array")
            .iter()
            .map(|r| r["code"].as_str().unwrap_or_default().to_string())
            .collect();
        assert!(codes.iter().any(|c| c == "REEXTRACTION_FAILED"));
    }

    // --- Fusion wiring ---

    #[test]
    fn conflicting_signature_surfaces_in_evidence() {
        let mut ext = extraction();
        if let Some(sig) = ext.image_qa_results.get_mut("customer_signature") {
            sig.present = false;
        }
        let mut resolver = resolver(ScriptedProvider::new());
        let result = resolver
            .resolve(&input("doc-1", b"bytes"), &ext)
            .expect("resolve");

        assert_eq!(
            result.payload["fusionEvidence"]["overallOutcome"],
            serde_json::to_value(OverallOutcome::Conflict).expect("serializable")
        );
        assert_eq!(result.payload["routing"]["priority"], "high");
    }
}
