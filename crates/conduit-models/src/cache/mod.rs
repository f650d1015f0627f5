//! Response caching for routed requests.
//!
//! Responses are keyed by a deterministic fingerprint of the logical model,
//! the exact prompt text and the call parameters, and expire after a TTL.
//! Expired entries are dropped lazily on read and by a periodic sweep.

#[allow(clippy::module_inception)]
pub mod cache;
pub mod config;
pub mod store;
pub mod types;

use thiserror::Error;

pub use cache::ResponseCache;
pub use config::{CacheConfig, CacheConfigError};
pub use store::{CacheStore, InMemoryStore};
pub use types::{CacheEntry, CacheKey, CacheStats, KEY_PREFIX};

/// Errors raised by cache stores.
///
/// These never escape [`ResponseCache`]; they are logged and counted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The request could not be fingerprinted.
    #[error("Cache key error: {0}")]
    Key(String),

    /// The backing store failed.
    #[error("Cache store error: {0}")]
    Store(String),
}
