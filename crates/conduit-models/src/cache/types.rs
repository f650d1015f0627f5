//! Core data types for response caching.

use std::fmt;
use std::time::Duration;

use conduit_abstraction::ModelParameters;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::CacheError;

/// Prefix shared by every response cache key.
pub const KEY_PREFIX: &str = "llm_response:";

/// Deterministic fingerprint of a routed request.
///
/// Two requests share a key exactly when they name the same logical model,
/// have byte-identical prompts, and carry equal parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprints a request.
    ///
    /// # Arguments
    /// * `model` - Logical model name
    /// * `prompt` - Prompt text, hashed as is
    /// * `params` - Call parameters as supplied by the caller
    ///
    /// # Errors
    /// Returns `CacheError::Key` if the parameters cannot be serialized.
    pub fn fingerprint(
        model: &str,
        prompt: &str,
        params: &ModelParameters,
    ) -> Result<Self, CacheError> {
        let canonical_params =
            serde_json::to_string(params).map_err(|e| CacheError::Key(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(prompt.as_bytes());
        hasher.update(b":");
        hasher.update(canonical_params.as_bytes());

        Ok(Self(format!("{KEY_PREFIX}{:x}", hasher.finalize())))
    }

    /// Wraps an already computed key.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The response text.
    pub value: String,
    /// When the entry was written.
    pub created_at: Instant,
    /// When the entry stops being served.
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Creates an entry that lives for `ttl` from now.
    pub fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self { value, created_at: now, expires_at: now + ttl }
    }

    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses (including expired entries).
    pub total_misses: u64,
    /// Entries dropped for capacity or expiry.
    pub total_evictions: u64,
    /// Store failures that were degraded to misses or skipped writes.
    pub total_errors: u64,
    /// Current number of entries in the store.
    pub cache_size: usize,
}
