//! Derives a review-routing decision from reconciliation or fusion evidence.
//!
//! Reasons are tagged with a severity code (`S0` most severe .. `S3` least)
//! and presented sorted most-severe-first so downstream rendering is stable.
//! Priority derives from the worst reason: `high` if any `S0`, `medium` if
//! the worst is `S1`, else `low`.

use serde::{Deserialize, Serialize};

use crate::fusion::{FusedOutcome, FusionEvidence};
use crate::reconcile::ReconciliationResult;

/// Severity code on a review reason. Ordered most severe first: `S0 < S1 <
/// S2 < S3` in the derived `Ord`, so an ascending sort presents the most
/// severe reasons first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Blocking: the document cannot be trusted at all.
    S0,
    /// Serious: a resolution step failed outright.
    S1,
    /// Moderate: evidence exists but is weak.
    S2,
    /// Informational.
    S3,
}

/// Routing priority, derived from the worst severity present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// No urgent attention needed.
    Low,
    /// Worst reason is `S1`.
    Medium,
    /// At least one `S0` reason.
    High,
}

/// One severity-tagged review reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReason {
    /// Severity code.
    pub severity: Severity,
    /// Machine-readable reason code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// The routing decision for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRouting {
    /// Whether the document should go to a human reviewer.
    pub should_route: bool,
    /// Review priority.
    pub priority: Priority,
    /// Reasons, sorted ascending by severity code (most severe first).
    pub reasons: Vec<ReviewReason>,
}

impl ReviewRouting {
    /// Builds a routing decision from raw reasons: sorts them most severe
    /// first (stable, so insertion order breaks ties) and derives priority
    /// from the worst severity.
    #[must_use]
    pub fn from_reasons(mut reasons: Vec<ReviewReason>) -> Self {
        reasons.sort_by_key(|r| r.severity);
        let priority = match reasons.first().map(|r| r.severity) {
            Some(Severity::S0) => Priority::High,
            Some(Severity::S1) => Priority::Medium,
            _ => Priority::Low,
        };
        Self {
            should_route: !reasons.is_empty(),
            priority,
            reasons,
        }
    }

    /// Merges two routing decisions: reasons concatenate and re-sort, and
    /// the worse priority wins.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let mut reasons = self.reasons;
        reasons.extend(other.reasons);
        Self::from_reasons(reasons)
    }
}

/// Derives routing from a reconciliation result.
#[must_use]
pub fn route_reconciliation(result: &ReconciliationResult) -> ReviewRouting {
    let mut reasons = Vec::new();

    for field_name in &result.missing_required_fields {
        reasons.push(ReviewReason {
            severity: Severity::S0,
            code: "REQUIRED_FIELD_MISSING".to_string(),
            message: format!("required field {field_name} has no value after reconciliation"),
        });
    }
    if result.summary.fields_failed > 0 {
        reasons.push(ReviewReason {
            severity: Severity::S1,
            code: "REEXTRACTION_FAILED".to_string(),
            message: format!(
                "{} re-extraction attempt(s) did not improve confidence",
                result.summary.fields_failed
            ),
        });
    }
    if result.summary.low_confidence_count > 0 {
        reasons.push(ReviewReason {
            severity: Severity::S2,
            code: "LOW_CONFIDENCE_FIELDS".to_string(),
            message: format!(
                "{} field(s) remain below their calibration threshold",
                result.summary.low_confidence_count
            ),
        });
    }

    ReviewRouting::from_reasons(reasons)
}

/// Derives routing from fusion evidence.
#[must_use]
pub fn route_fusion(evidence: &FusionEvidence) -> ReviewRouting {
    let mut reasons = Vec::new();

    for field in &evidence.fields {
        match field.fused_outcome {
            FusedOutcome::Conflict => reasons.push(ReviewReason {
                severity: Severity::S0,
                code: "FUSION_CONFLICT".to_string(),
                message: format!("{}: {}", field.field_id, field.fusion_reason),
            }),
            FusedOutcome::MissingField => reasons.push(ReviewReason {
                severity: Severity::S1,
                code: "FIELD_MISSING".to_string(),
                message: format!("{}: {}", field.field_id, field.fusion_reason),
            }),
            FusedOutcome::LowConfidence => reasons.push(ReviewReason {
                severity: Severity::S2,
                code: "FUSION_LOW_CONFIDENCE".to_string(),
                message: format!("{}: {}", field.field_id, field.fusion_reason),
            }),
            FusedOutcome::Valid => {},
        }
    }

    ReviewRouting::from_reasons(reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(severity: Severity, code: &'static str) -> ReviewReason {
        ReviewReason {
            severity,
            code: code.to_string(),
            message: code.to_lowercase(),
        }
    }

    // --- Ordering and priority ---

    #[test]
    fn reasons_sorted_most_severe_first() {
        let routing = ReviewRouting::from_reasons(vec![
            reason(Severity::S2, "C"),
            reason(Severity::S0, "A"),
            reason(Severity::S1, "B"),
        ]);
        let severities: Vec<Severity> = routing.reasons.iter().map(|r| r.severity).collect();
        assert_eq!(severities, [Severity::S0, Severity::S1, Severity::S2]);
        assert_eq!(routing.priority, Priority::High);
        assert!(routing.should_route);
    }

    #[test]
    fn worst_s1_is_medium() {
        let routing = ReviewRouting::from_reasons(vec![
            reason(Severity::S2, "C"),
            reason(Severity::S1, "B"),
        ]);
        assert_eq!(routing.priority, Priority::Medium);
    }

    #[test]
    fn worst_s2_is_low() {
        let routing = ReviewRouting::from_reasons(vec![reason(Severity::S2, "C")]);
        assert_eq!(routing.priority, Priority::Low);
    }

    #[test]
    fn no_reasons_no_routing() {
        let routing = ReviewRouting::from_reasons(Vec::new());
        assert!(!routing.should_route);
        assert_eq!(routing.priority, Priority::Low);
    }

    #[test]
    fn merge_takes_worst_priority() {
        let low = ReviewRouting::from_reasons(vec![reason(Severity::S2, "C")]);
        let high = ReviewRouting::from_reasons(vec![reason(Severity::S0, "A")]);
        let merged = low.merge(high);
        assert_eq!(merged.priority, Priority::High);
        assert_eq!(merged.reasons.len(), 2);
        assert_eq!(merged.reasons[0].severity, Severity::S0);
    }

    #[test]
    fn stable_sort_preserves_insertion_order_within_severity() {
        let routing = ReviewRouting::from_reasons(vec![
            reason(Severity::S2, "FIRST"),
            reason(Severity::S2, "SECOND"),
        ]);
        assert_eq!(routing.reasons[0].code, "FIRST");
        assert_eq!(routing.reasons[1].code, "SECOND");
    }
}
