//! Confidence reconciliation by targeted re-extraction.
//!
//! Given a document's primary-extracted fields and a calibration table, the
//! engine decides which fields need another pass, issues bounding-box-scoped
//! re-extraction requests against the provider seam, and merges results back
//! deterministically. Per-field failures are captured as data; nothing here
//! aborts a document.

mod engine;
mod field;
mod provider;

pub use engine::{
    MAX_DOCUMENT_FIELDS, ReExtractionOutcome, ReExtractionReason, ReExtractionRequest,
    ReconcileError, ReconciliationEngine, ReconciliationResult, ReconciliationSummary,
};
pub use field::{BoundingBox, ExtractedField, FieldSource};
pub use provider::{ExtractionProvider, ProviderError, ProviderExtraction, ScriptedProvider};
