//! Cache key derivation.
//!
//! A cache key is the SHA-256 digest of three components in fixed field
//! order: the file content hash, the template configuration hash, and the
//! named engine versions. The ordering is an invariant — changing it (or the
//! domain separator) invalidates every existing cache entry, which is the
//! intended behavior for an engine-revision bump.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, Digest, encode_hex};

/// Domain separator for cache key derivation.
pub const CACHE_KEY_DOMAIN: &str = "veridoc.cache.result_key.v1";

/// Maximum length of any single key component string.
const MAX_COMPONENT_LENGTH: usize = 1024;

/// Errors from cache key construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheKeyError {
    /// A required key component is missing or empty.
    #[error("missing required key component: {component}")]
    MissingComponent {
        /// Name of the missing component.
        component: &'static str,
    },

    /// A component exceeds the maximum allowed length.
    #[error("key component {component} too long: {actual} > {max}")]
    ComponentTooLong {
        /// Name of the offending component.
        component: &'static str,
        /// Actual length.
        actual: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// The components that uniquely identify a cached result.
///
/// All components are required and validated at construction time. The
/// engine version set is kept in a `BTreeMap` so its contribution to the
/// derived key is independent of the order the caller supplied it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheKeyComponents {
    /// Hex-encoded SHA-256 digest of the raw file bytes.
    pub file_hash: String,
    /// Hex-encoded SHA-256 digest of the canonical template configuration.
    pub template_hash: String,
    /// Named subsystem identifiers mapped to version strings
    /// (e.g. `"ocr" -> "2.1.0"`).
    pub engine_versions: BTreeMap<String, String>,
}

impl CacheKeyComponents {
    /// Creates validated key components.
    ///
    /// # Errors
    ///
    /// Returns [`CacheKeyError::MissingComponent`] if any component is empty
    /// or whitespace-only, or [`CacheKeyError::ComponentTooLong`] if a
    /// component exceeds the length bound.
    pub fn new(
        file_hash: impl Into<String>,
        template_hash: impl Into<String>,
        engine_versions: BTreeMap<String, String>,
    ) -> Result<Self, CacheKeyError> {
        let file_hash = file_hash.into();
        let template_hash = template_hash.into();

        Self::validate_component("file_hash", &file_hash)?;
        Self::validate_component("template_hash", &template_hash)?;
        if engine_versions.is_empty() {
            return Err(CacheKeyError::MissingComponent {
                component: "engine_versions",
            });
        }
        for (name, version) in &engine_versions {
            Self::validate_component("engine_versions.name", name)?;
            Self::validate_component("engine_versions.version", version)?;
        }

        Ok(Self {
            file_hash,
            template_hash,
            engine_versions,
        })
    }

    fn validate_component(name: &'static str, value: &str) -> Result<(), CacheKeyError> {
        if value.trim().is_empty() {
            return Err(CacheKeyError::MissingComponent { component: name });
        }
        if value.len() > MAX_COMPONENT_LENGTH {
            return Err(CacheKeyError::ComponentTooLong {
                component: name,
                actual: value.len(),
                max: MAX_COMPONENT_LENGTH,
            });
        }
        Ok(())
    }

    /// Derives the cache key from the components.
    ///
    /// The digest covers, in this exact order: the domain separator, the
    /// file hash, the template hash, then each engine entry as a name/version
    /// pair in `BTreeMap` (lexicographic) order. Every component is
    /// length-prefixed, so no two distinct component lists share a key.
    #[must_use]
    pub fn derive_key(&self) -> CacheKey {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2 + self.engine_versions.len() * 2);
        parts.push(self.file_hash.as_bytes());
        parts.push(self.template_hash.as_bytes());
        for (name, version) in &self.engine_versions {
            parts.push(name.as_bytes());
            parts.push(version.as_bytes());
        }
        CacheKey(crypto::hash_components(CACHE_KEY_DOMAIN, &parts))
    }
}

/// A derived cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(Digest);

impl CacheKey {
    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Digest {
        &self.0
    }

    /// Renders the key as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
