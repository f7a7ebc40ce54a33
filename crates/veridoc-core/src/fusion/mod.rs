//! Two-source field fusion.
//!
//! Some fields — signature blocks, tickbox and checklist blocks — are judged
//! twice: once by text extraction and once by image-based visual inspection.
//! Neither source owns the other; fusion is the only place the two are
//! combined, under a fixed decision table with explicit conflict handling.
//! Fields outside the joint-inspection registry bypass fusion entirely and
//! rely on extraction plus reconciliation alone.

mod engine;

pub use engine::{
    AGREEMENT_BONUS, CROP_HASH_DOMAIN, CropReference, DEFAULT_HIGH_CONFIDENCE,
    DEFAULT_MIN_VALID_CONFIDENCE, FusedFieldResult, FusedOutcome, FusionConfig, FusionEngine,
    FusionEvidence, ImageQaFieldResult, JOINT_INSPECTION_FIELDS, OcrFieldResult, OverallOutcome,
    requires_joint_inspection,
};
