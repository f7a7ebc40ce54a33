//! Deterministic field resolution engine for scanned job-sheet audits.
//!
//! `veridoc-core` is the library consumed by the document-audit pipeline. It
//! takes confidence-scored field extractions produced by external OCR and
//! image-inspection providers and turns them into reconciled, fused, cached
//! verdicts that are reproducible byte-for-byte across runs.
//!
//! The engine has three responsibilities:
//!
//! - **Result caching by content identity**: expensive extraction/validation
//!   output is cached under a key derived from the document bytes, the
//!   template configuration, and the engine version set, so repeated runs are
//!   free and byte-identical ([`cache`]).
//! - **Confidence reconciliation**: only the fields whose confidence or
//!   presence is insufficient are re-extracted, and results merge back
//!   deterministically regardless of completion order ([`reconcile`]).
//! - **Two-source fusion**: independent text-extraction and image-inspection
//!   judgments of the same field are combined into one authoritative verdict
//!   with explicit conflict handling ([`fusion`]).
//!
//! Review routing ([`review`]) derives a human-review decision from either
//! result, and every externally visible record has a canonical, byte-stable
//! JSON rendering ([`artifact`]) for the downstream parity harness.
//!
//! # Design Principles
//!
//! 1. **Determinism**: output depends only on input content, never on
//!    environment, arrival order, or wall-clock time.
//! 2. **No silent verdicts**: a document that cannot be resolved confidently
//!    is routed to review with enumerated, severity-tagged reasons; the
//!    engine never fabricates a passing result.
//! 3. **Provider failures are data**: a failed re-extraction or inspection is
//!    recorded as a non-improving result, never propagated as an error from
//!    the public entry points.

pub mod artifact;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod crypto;
pub mod fusion;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod review;
