//! Storage backends for the response cache.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::time::Instant;

use super::CacheError;
use super::types::{CacheEntry, CacheKey};

/// Key-value storage behind a [`ResponseCache`](super::ResponseCache).
///
/// Writes are atomic per key. Implementations may fail; the cache treats
/// every failure as a miss.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Returns the entry stored under `key`, expired or not.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores `entry`, replacing any previous value. Returns how many other
    /// entries were evicted to make room.
    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<usize, CacheError>;

    /// Removes `key`. Returns true if it was present.
    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Removes `key` only if its entry is expired at `now`, so a value
    /// written after the caller's read survives. Returns true if removed.
    async fn remove_if_expired(&self, key: &CacheKey, now: Instant) -> Result<bool, CacheError>;

    /// Drops every entry expired at `now`. Returns how many were dropped.
    async fn purge_expired(&self, now: Instant) -> Result<usize, CacheError>;

    /// Drops everything.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, CacheError>;
}

/// Process-local store with a fixed capacity.
///
/// When full, inserting a new key evicts the entry written longest ago.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    max_entries: usize,
}

impl InMemoryStore {
    /// Creates a store holding at most `max_entries` responses.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), max_entries: max_entries.max(1) }
    }

    fn find_oldest_key(entries: &HashMap<CacheKey, CacheEntry>) -> Option<CacheKey> {
        entries.iter().min_by_key(|(_, entry)| entry.created_at).map(|(key, _)| key.clone())
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Store("in-memory cache lock poisoned".to_string())
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let mut evicted = 0;
        if !entries.contains_key(&key) {
            while entries.len() >= self.max_entries {
                let Some(oldest) = Self::find_oldest_key(&entries) else { break };
                entries.remove(&oldest);
                evicted += 1;
            }
        }
        entries.insert(key, entry);
        Ok(evicted)
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn remove_if_expired(&self, key: &CacheKey, now: Instant) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_expired(&self, now: Instant) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}
