//! The extraction provider seam.
//!
//! The actual OCR engines live out of process; this module defines the
//! interface the reconciliation engine calls through, and a scripted
//! implementation for tests and offline runs. Provider failures are ordinary
//! values at this seam — the engine records them per field and keeps going.

use std::collections::HashMap;

use thiserror::Error;

use super::engine::ReExtractionRequest;
use super::field::FieldSource;

/// Errors a provider call can surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider could not read the requested region.
    #[error("region unreadable for field {field_name}: {detail}")]
    RegionUnreadable {
        /// Field the request targeted.
        field_name: String,
        /// Provider-supplied detail.
        detail: String,
    },

    /// The provider call timed out (host-enforced).
    #[error("extraction timed out for field {field_name}")]
    Timeout {
        /// Field the request targeted.
        field_name: String,
    },

    /// The provider rejected the request outright.
    #[error("extraction rejected for field {field_name}: {detail}")]
    Rejected {
        /// Field the request targeted.
        field_name: String,
        /// Provider-supplied detail.
        detail: String,
    },
}

/// A provider's answer to one targeted re-extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderExtraction {
    /// Extracted value, absent when the region held nothing legible.
    pub value: Option<String>,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which extraction path produced the value.
    pub source: FieldSource,
}

/// Targeted extraction over a document region.
///
/// Implementations may fan requests out concurrently at the host's
/// discretion; the engine's merge step is insensitive to completion order.
pub trait ExtractionProvider {
    /// Re-extracts one field from its bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the region cannot be read; the engine
    /// converts this into a failed (`success = false`) outcome rather than
    /// propagating it.
    fn re_extract(&self, request: &ReExtractionRequest)
    -> Result<ProviderExtraction, ProviderError>;
}

/// A scripted provider: answers from a fixed field-name table.
///
/// This is the explicit test double for the provider seam. Unknown fields
/// get a [`ProviderError::RegionUnreadable`], which exercises the engine's
/// failure capture without any real OCR behind it.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: HashMap<String, ProviderExtraction>,
}

impl ScriptedProvider {
    /// Creates an empty script; every request will fail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the answer for a field name.
    #[must_use]
    pub fn with_response(
        mut self,
        field_name: impl Into<String>,
        value: Option<&str>,
        confidence: f64,
    ) -> Self {
        self.responses.insert(
            field_name.into(),
            ProviderExtraction {
                value: value.map(ToString::to_string),
                confidence,
                source: FieldSource::Reocr,
            },
        );
        self
    }
}

impl ExtractionProvider for ScriptedProvider {
    fn re_extract(
        &self,
        request: &ReExtractionRequest,
    ) -> Result<ProviderExtraction, ProviderError> {
        self.responses.get(&request.field_name).cloned().ok_or_else(|| {
            ProviderError::RegionUnreadable {
                field_name: request.field_name.clone(),
                detail: "no scripted response".to_string(),
            }
        })
    }
}
