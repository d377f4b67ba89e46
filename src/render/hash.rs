//! Content hashing for change detection.
//!
//! Resource digests are SHA-256 over the canonical JSON encoding of the
//! manifest. `serde_json` maps are ordered by key, so two manifests with the
//! same content always hash identically regardless of the order their
//! fields appeared in the template.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hasher for computing resource content digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHasher {
    /// Creates a new content hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the digest of a manifest.
    #[must_use]
    pub fn digest(&self, content: &Value) -> String {
        let mut hasher = Sha256::new();
        // Serializing a `Value` cannot fail: keys are always strings.
        let canonical = serde_json::to_vec(content).unwrap_or_default();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    /// Computes a digest over a sequence of digests, e.g. a whole manifest set.
    #[must_use]
    pub fn digest_all<'a>(&self, digests: impl IntoIterator<Item = &'a str>) -> String {
        let mut hasher = Sha256::new();
        for digest in digests {
            hasher.update(digest.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
