//! SHA-256 content identity.
//!
//! A content identity is the SHA-256 digest of byte-exact input content: two
//! identities are equal iff the hashed content is byte-identical. Document
//! bytes hash directly; template configurations hash through their canonical
//! JSON serialization so that key order and formatting cannot perturb the
//! identity.
//!
//! Multi-component digests (cache keys, crop hashes) go through
//! [`hash_components`], which applies a domain separator and length-prefix
//! framing so that concatenated components can never be confused with one
//! another.

use serde::Serialize;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::artifact::{self, ArtifactError};

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Type alias for a 32-byte SHA-256 digest.
pub type Digest = [u8; DIGEST_SIZE];

/// Errors from hashing a template configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateHashError {
    /// The template configuration could not be canonically serialized.
    #[error("template configuration is not serializable: {0}")]
    Canonicalize(#[from] ArtifactError),
}

/// Hasher for content identities.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes raw document bytes.
    #[must_use]
    pub fn hash_bytes(content: &[u8]) -> Digest {
        Sha256::digest(content).into()
    }

    /// Hashes a template configuration through its canonical JSON form.
    ///
    /// Two template configurations that are structurally equal produce the
    /// same digest regardless of how the caller ordered their keys.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateHashError::Canonicalize`] if the configuration
    /// cannot be serialized to JSON.
    pub fn hash_template<T: Serialize>(template: &T) -> Result<Digest, TemplateHashError> {
        let canonical = artifact::to_canonical_json(template)?;
        Ok(Self::hash_bytes(canonical.as_bytes()))
    }
}

/// Computes a domain-separated digest over a fixed-order component list.
///
/// The digest is:
///
/// ```text
/// SHA256(domain || len(c_0) || c_0 || len(c_1) || c_1 || ...)
/// ```
///
/// with each length encoded as a u32 big-endian prefix. The framing prevents
/// ambiguity between adjacent components, and the domain separator keeps
/// digests from unrelated key spaces disjoint.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hash_components(domain: &str, components: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    for component in components {
        hasher.update((component.len() as u32).to_be_bytes());
        hasher.update(component);
    }
    hasher.finalize().into()
}

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}
