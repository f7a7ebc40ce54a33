//! Result caching by content identity.
//!
//! The cache is the only component with cross-run shared state. Keys derive
//! from the document's content identity, the template configuration identity,
//! and the engine version set ([`key`]); the store itself is a bounded,
//! TTL-aware map with least-recently-accessed eviction ([`store`]).
//!
//! There is deliberately no process-wide default instance: the pipeline's
//! top-level orchestrator constructs the store explicitly and passes it down,
//! and [`ResultCache::reset`] gives tests an explicit teardown.

mod key;
mod store;

pub use key::{CACHE_KEY_DOMAIN, CacheKey, CacheKeyComponents, CacheKeyError};
pub use store::{
    CachePolicy, CacheStats, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SIZE_BYTES, DEFAULT_TTL_SECS,
    EntryMetadata, MAX_CACHE_ENTRIES, ResultCache, StoreError,
};
