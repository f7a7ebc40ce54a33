//! Hashing primitives for content identity.

mod hash;

pub use hash::{
    ContentHasher, DIGEST_SIZE, Digest, TemplateHashError, encode_hex, hash_components,
};
