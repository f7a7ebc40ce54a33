//! Bounded, TTL-aware result store.
//!
//! # Design
//!
//! - [`ResultCache`]: entry map bounded by `max_entries` and
//!   `max_size_bytes`. When a new entry would exceed either bound, the store
//!   evicts least-recently-accessed entries first (ties broken by insertion
//!   order) until the new entry fits.
//! - Every entry carries a fixed TTL from creation. A `get` on an expired
//!   entry behaves identically to a miss: the entry is removed lazily and
//!   nothing stale is ever returned, because cache hits are contractually
//!   byte-identical to a fresh computation.
//! - Payloads are stored and returned verbatim as JSON trees. There is no
//!   re-serialization step between `set` and `get`.
//!
//! # Synchronization Protocol
//!
//! All entry and counter state lives behind a single `Mutex` per store
//! instance, so eviction and expiry decisions are made under one logical
//! ordering. Cache operations are O(1) amortized apart from the eviction
//! scan and are not the pipeline's throughput bottleneck (provider calls
//! dominate).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::key::{CacheKey, CacheKeyComponents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Hard upper bound on cache entries, independent of policy.
pub const MAX_CACHE_ENTRIES: usize = 100_000;

/// Default maximum number of resident entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1_024;

/// Default maximum total payload size (64 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// Default entry TTL in seconds (one hour).
pub const DEFAULT_TTL_SECS: u64 = 3_600;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Policy governing cache bounds and freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct CachePolicy {
    /// Maximum number of resident entries. Must be in
    /// `1..=`[`MAX_CACHE_ENTRIES`].
    pub max_entries: usize,
    /// Maximum total payload size in bytes.
    pub max_size_bytes: u64,
    /// Entry TTL in seconds, counted from creation.
    pub ttl_secs: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl CachePolicy {
    /// The entry TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Checks the policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPolicy`] if `max_entries` is zero or
    /// exceeds [`MAX_CACHE_ENTRIES`], or if `max_size_bytes` or `ttl_secs`
    /// is zero.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_entries == 0 || self.max_entries > MAX_CACHE_ENTRIES {
            return Err(StoreError::InvalidPolicy {
                reason: format!(
                    "max_entries {} outside 1..={MAX_CACHE_ENTRIES}",
                    self.max_entries
                ),
            });
        }
        if self.max_size_bytes == 0 {
            return Err(StoreError::InvalidPolicy {
                reason: "max_size_bytes must be at least 1".to_string(),
            });
        }
        if self.ttl_secs == 0 {
            return Err(StoreError::InvalidPolicy {
                reason: "ttl_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors from store construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The policy is outside acceptable bounds.
    #[error("invalid cache policy: {reason}")]
    InvalidPolicy {
        /// Why the policy was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Aggregated cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of hits served.
    pub hits: u64,
    /// Number of misses (including lazy expirations).
    pub misses: u64,
    /// Hit rate: `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_rate: f64,
    /// Number of resident entries.
    pub total_entries: usize,
    /// Total payload size of resident entries in bytes.
    pub total_size_bytes: u64,
    /// Number of entries evicted to make room.
    pub evictions: u64,
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Observable metadata for a resident entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Times the entry has been served.
    pub hit_count: u64,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Time since the entry was created.
    pub age: Duration,
    /// Time since the entry was last accessed.
    pub idle: Duration,
}

/// A resident cache entry. The store exclusively owns entry lifecycle;
/// nothing outside mutates an entry except the access metadata updated on
/// `get`.
#[derive(Debug)]
struct CacheEntry {
    payload: Value,
    components: CacheKeyComponents,
    created_at: Instant,
    last_access: Instant,
    hit_count: u64,
    size_bytes: u64,
    /// Monotonic sequence of the most recent access (insertion counts).
    access_seq: u64,
    /// Monotonic sequence at insertion, the eviction tie-break.
    insert_seq: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    total_size_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    seq: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.seq = self.seq.saturating_add(1);
        self.seq
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evicts the least-recently-accessed entry, ties broken by insertion
    /// order. Returns `false` when the map is empty.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.access_seq, e.insert_seq))
            .map(|(key, _)| *key);
        let Some(key) = victim else {
            return false;
        };
        self.remove_entry(&key);
        self.evictions = self.evictions.saturating_add(1);
        true
    }
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

/// Bounded, TTL-aware store for resolved-document payloads.
///
/// Construct one explicitly and hand it to the pipeline orchestrator; there
/// is no ambient default instance.
#[derive(Debug)]
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    policy: CachePolicy,
}

impl ResultCache {
    /// Creates a store with the given policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPolicy`] if `max_entries` is zero or
    /// exceeds [`MAX_CACHE_ENTRIES`], or if `max_size_bytes` or `ttl_secs`
    /// is zero.
    pub fn new(policy: CachePolicy) -> Result<Self, StoreError> {
        policy.validate()?;
        Ok(Self {
            inner: Mutex::new(CacheInner::default()),
            policy,
        })
    }

    /// Creates a store with the default policy.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            policy: CachePolicy::default(),
        }
    }

    /// Returns the governing policy.
    #[must_use]
    pub const fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A poisoned lock means a panic mid-operation elsewhere; the entry
        // map is still structurally valid, so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or overwrites an entry, evicting least-recently-accessed
    /// entries until the new entry fits within both bounds.
    ///
    /// A payload larger than `max_size_bytes` on its own is not cached at
    /// all; dropping it keeps the size bound intact and the next `get` is an
    /// ordinary miss.
    pub fn set(&self, key: CacheKey, payload: Value, components: CacheKeyComponents) {
        let size_bytes = payload_size(&payload);
        let mut inner = self.lock();

        // Overwrite releases the old entry's accounting first.
        inner.remove_entry(&key);

        if size_bytes > self.policy.max_size_bytes {
            tracing::warn!(
                key = %key,
                size_bytes,
                max_size_bytes = self.policy.max_size_bytes,
                "payload exceeds cache size bound; not cached"
            );
            return;
        }

        while inner.entries.len() >= self.policy.max_entries
            || inner.total_size_bytes.saturating_add(size_bytes) > self.policy.max_size_bytes
        {
            if !inner.evict_one() {
                break;
            }
        }

        let seq = inner.next_seq();
        let now = Instant::now();
        inner.entries.insert(
            key,
            CacheEntry {
                payload,
                components,
                created_at: now,
                last_access: now,
                hit_count: 0,
                size_bytes,
                access_seq: seq,
                insert_seq: seq,
            },
        );
        inner.total_size_bytes = inner.total_size_bytes.saturating_add(size_bytes);
    }

    /// Looks up an entry, refreshing its access metadata on hit.
    ///
    /// Expired entries are removed lazily and reported as misses; the
    /// returned payload is always exactly what the most recent `set` stored.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let ttl = self.policy.ttl();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses = inner.misses.saturating_add(1);
                return None;
            },
            Some(entry) => entry.created_at.elapsed() > ttl,
        };
        if expired {
            inner.remove_entry(key);
            inner.misses = inner.misses.saturating_add(1);
            return None;
        }

        let seq = inner.next_seq();
        // Presence was checked above under the same lock; if the entry is
        // somehow gone, degrade to a miss rather than panic.
        let Some(entry) = inner.entries.get_mut(key) else {
            inner.misses = inner.misses.saturating_add(1);
            return None;
        };
        entry.hit_count = entry.hit_count.saturating_add(1);
        entry.last_access = Instant::now();
        entry.access_seq = seq;
        let payload = entry.payload.clone();
        inner.hits = inner.hits.saturating_add(1);
        Some(payload)
    }

    /// Non-mutating existence check. Counts nothing and removes nothing;
    /// expired entries report `false`.
    #[must_use]
    pub fn has(&self, key: &CacheKey) -> bool {
        let ttl = self.policy.ttl();
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.created_at.elapsed() <= ttl)
    }

    /// Returns the key components recorded with a resident entry.
    #[must_use]
    pub fn components(&self, key: &CacheKey) -> Option<CacheKeyComponents> {
        let inner = self.lock();
        inner.entries.get(key).map(|e| e.components.clone())
    }

    /// Returns a metadata snapshot for a resident entry. Non-mutating, like
    /// [`ResultCache::has`].
    #[must_use]
    pub fn entry_metadata(&self, key: &CacheKey) -> Option<EntryMetadata> {
        let inner = self.lock();
        inner.entries.get(key).map(|e| EntryMetadata {
            hit_count: e.hit_count,
            size_bytes: e.size_bytes,
            age: e.created_at.elapsed(),
            idle: e.last_access.elapsed(),
        })
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Snapshot of the aggregate statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // u64 -> f64 is acceptable for a ratio
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            total_entries: inner.entries.len(),
            total_size_bytes: inner.total_size_bytes,
            evictions: inner.evictions,
        }
    }

    /// Clears all entries and counters. Explicit teardown for tests and for
    /// engine-version rollovers.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = CacheInner::default();
    }
}

/// Size accounting for a payload: the length of its compact JSON rendering.
fn payload_size(payload: &Value) -> u64 {
    serde_json::to_string(payload).map_or(0, |s| s.len() as u64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::thread;

    use super::*;

    fn components(tag: &str) -> CacheKeyComponents {
        let mut versions = BTreeMap::new();
        versions.insert("ocr".to_string(), "1.0.0".to_string());
        CacheKeyComponents::new(format!("file-{tag}"), format!("tpl-{tag}"), versions)
            .expect("valid components")
    }

    fn key_for(tag: &str) -> CacheKey {
        components(tag).derive_key()
    }

    fn small_policy(max_entries: usize) -> CachePolicy {
        CachePolicy {
            max_entries,
            ..CachePolicy::default()
        }
    }

    // --- Construction ---

    #[test]
    fn zero_max_entries_rejected() {
        let err = ResultCache::new(small_policy(0)).expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidPolicy { .. }));
    }

    #[test]
    fn over_hard_cap_rejected() {
        let err = ResultCache::new(small_policy(MAX_CACHE_ENTRIES + 1)).expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidPolicy { .. }));
    }

    // --- Determinism ---

    #[test]
    fn get_returns_payload_verbatim() {
        let cache = ResultCache::with_defaults();
        let payload = serde_json::json!({
            "documentId": "doc-123",
            "extractedFields": { "jobRef": "JOB-1" }
        });
        cache.set(key_for("a"), payload.clone(), components("a"));

        let fetched = cache.get(&key_for("a")).expect("hit");
        assert_eq!(fetched, payload);
        assert_eq!(
            serde_json::to_string(&fetched).unwrap(),
            serde_json::to_string(&payload).unwrap()
        );
    }

    #[test]
    fn overwrite_replaces_payload() {
        let cache = ResultCache::with_defaults();
        cache.set(key_for("a"), serde_json::json!({"v": 1}), components("a"));
        cache.set(key_for("a"), serde_json::json!({"v": 2}), components("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&key_for("a")).expect("hit"),
            serde_json::json!({"v": 2})
        );
    }

    // --- Eviction ---

    #[test]
    fn eviction_bound_holds() {
        let cache = ResultCache::new(small_policy(3)).expect("valid policy");
        for tag in ["a", "b", "c", "d"] {
            cache.set(key_for(tag), serde_json::json!({"t": tag}), components(tag));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn least_recently_accessed_evicted_first() {
        let cache = ResultCache::new(small_policy(2)).expect("valid policy");
        cache.set(key_for("a"), serde_json::json!({}), components("a"));
        cache.set(key_for("b"), serde_json::json!({}), components("b"));

        // Touch "a" so "b" becomes least recently accessed.
        let _ = cache.get(&key_for("a"));
        cache.set(key_for("c"), serde_json::json!({}), components("c"));

        assert!(cache.has(&key_for("a")));
        assert!(!cache.has(&key_for("b")));
        assert!(cache.has(&key_for("c")));
    }

    #[test]
    fn eviction_ties_break_by_insertion_order() {
        let cache = ResultCache::new(small_policy(2)).expect("valid policy");
        cache.set(key_for("a"), serde_json::json!({}), components("a"));
        cache.set(key_for("b"), serde_json::json!({}), components("b"));
        // Neither touched since insertion: "a" was inserted first.
        cache.set(key_for("c"), serde_json::json!({}), components("c"));

        assert!(!cache.has(&key_for("a")));
        assert!(cache.has(&key_for("b")));
    }

    #[test]
    fn size_bound_triggers_eviction() {
        let policy = CachePolicy {
            max_entries: 100,
            max_size_bytes: 64,
            ttl_secs: 60,
        };
        let cache = ResultCache::new(policy).expect("valid policy");
        cache.set(
            key_for("a"),
            serde_json::json!({"pad": "x".repeat(30)}),
            components("a"),
        );
        cache.set(
            key_for("b"),
            serde_json::json!({"pad": "y".repeat(30)}),
            components("b"),
        );
        assert_eq!(cache.len(), 1, "first entry evicted to fit the second");
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn oversized_payload_not_cached() {
        let policy = CachePolicy {
            max_entries: 10,
            max_size_bytes: 16,
            ttl_secs: 60,
        };
        let cache = ResultCache::new(policy).expect("valid policy");
        cache.set(
            key_for("a"),
            serde_json::json!({"pad": "x".repeat(100)}),
            components("a"),
        );
        assert!(cache.is_empty());
        assert!(cache.get(&key_for("a")).is_none());
    }

    // --- Expiry ---

    #[test]
    fn expired_entry_behaves_as_miss() {
        let policy = CachePolicy {
            max_entries: 10,
            max_size_bytes: 1024,
            ttl_secs: 1,
        };
        let cache = ResultCache::new(policy).expect("valid policy");
        cache.set(key_for("a"), serde_json::json!({"v": 1}), components("a"));
        assert!(cache.has(&key_for("a")));

        thread::sleep(Duration::from_millis(1_100));
        assert!(!cache.has(&key_for("a")));
        assert!(cache.get(&key_for("a")).is_none());
        assert!(cache.is_empty(), "expired entry removed lazily");

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    // --- Stats ---

    #[test]
    fn stats_track_hits_misses_and_rate() {
        let cache = ResultCache::with_defaults();
        cache.set(key_for("a"), serde_json::json!({}), components("a"));

        let _ = cache.get(&key_for("a"));
        let _ = cache.get(&key_for("a"));
        let _ = cache.get(&key_for("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_entries, 1);
        assert!(stats.total_size_bytes > 0);
    }

    #[test]
    fn entry_metadata_tracks_access() {
        let cache = ResultCache::with_defaults();
        cache.set(key_for("a"), serde_json::json!({"v": 1}), components("a"));

        let before = cache.entry_metadata(&key_for("a")).expect("resident");
        assert_eq!(before.hit_count, 0);
        assert!(before.size_bytes > 0);

        let _ = cache.get(&key_for("a"));
        let _ = cache.get(&key_for("a"));
        let after = cache.entry_metadata(&key_for("a")).expect("resident");
        assert_eq!(after.hit_count, 2);
    }

    #[test]
    fn has_does_not_mutate_stats() {
        let cache = ResultCache::with_defaults();
        cache.set(key_for("a"), serde_json::json!({}), components("a"));
        assert!(cache.has(&key_for("a")));
        assert!(!cache.has(&key_for("b")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    // --- Reset ---

    #[test]
    fn reset_clears_entries_and_counters() {
        let cache = ResultCache::with_defaults();
        cache.set(key_for("a"), serde_json::json!({}), components("a"));
        let _ = cache.get(&key_for("a"));
        cache.reset();

        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_size_bytes, 0);
    }
}
