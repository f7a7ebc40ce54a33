//! Passive performance counters.
//!
//! The tracker accumulates observability counters for the pipeline. It is a
//! passive collaborator: nothing in the engine reads these values to make a
//! decision.

use serde::{Deserialize, Serialize};

/// Accumulated counters for one pipeline instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceTracker {
    pages_processed: u64,
    fields_extracted: u64,
    cache_hits: u64,
    cache_misses: u64,
    documents_resolved: u64,
    reocr_requests: u64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    /// Pages processed across all documents.
    pub pages_processed: u64,
    /// Fields extracted (reconciled field count, summed).
    pub fields_extracted: u64,
    /// Documents served from cache.
    pub cache_hits: u64,
    /// Documents computed fresh.
    pub cache_misses: u64,
    /// Documents resolved, hit or miss.
    pub documents_resolved: u64,
    /// Targeted re-extraction requests issued.
    pub reocr_requests: u64,
}

impl PerformanceTracker {
    /// Creates a zeroed tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a document served from cache.
    pub fn record_cache_hit(&mut self) {
        self.cache_hits = self.cache_hits.saturating_add(1);
        self.documents_resolved = self.documents_resolved.saturating_add(1);
    }

    /// Records a freshly computed document.
    pub fn record_cache_miss(&mut self, pages: u64, fields: u64, reocr_requests: u64) {
        self.cache_misses = self.cache_misses.saturating_add(1);
        self.documents_resolved = self.documents_resolved.saturating_add(1);
        self.pages_processed = self.pages_processed.saturating_add(pages);
        self.fields_extracted = self.fields_extracted.saturating_add(fields);
        self.reocr_requests = self.reocr_requests.saturating_add(reocr_requests);
    }

    /// Fraction of documents served from cache. `0.0` before any document.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // u64 -> f64 is acceptable for a ratio
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.documents_resolved == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.documents_resolved as f64
    }

    /// Copies the current counters.
    #[must_use]
    pub const fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            pages_processed: self.pages_processed,
            fields_extracted: self.fields_extracted,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            documents_resolved: self.documents_resolved,
            reocr_requests: self.reocr_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_cache_miss(3, 12, 2);
        tracker.record_cache_hit();
        tracker.record_cache_miss(1, 5, 0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.pages_processed, 4);
        assert_eq!(snapshot.fields_extracted, 17);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.documents_resolved, 3);
        assert_eq!(snapshot.reocr_requests, 2);
    }

    #[test]
    fn hit_ratio_zero_when_idle() {
        assert!(PerformanceTracker::new().cache_hit_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn hit_ratio_computed() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_cache_hit();
        tracker.record_cache_miss(1, 1, 0);
        assert!((tracker.cache_hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
