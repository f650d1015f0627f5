//! ResponseCache implementation with TTL expiry and a periodic sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use conduit_abstraction::ModelParameters;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::store::{CacheStore, InMemoryStore};
use super::types::{CacheEntry, CacheKey, CacheStats};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// Response cache consulted by the router before any backend call.
///
/// Never fails: store errors are logged, counted, and treated as misses.
#[derive(Debug)]
pub struct ResponseCache {
    /// The cache storage.
    store: Arc<dyn CacheStore>,
    /// Cache configuration.
    config: CacheConfig,
    /// Cache statistics.
    counters: Counters,
}

impl ResponseCache {
    /// Create a new in-memory response cache with the given configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        let store = Arc::new(InMemoryStore::new(config.max_entries));
        Self::with_store(config, store)
    }

    /// Create a response cache over a custom store.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn with_store(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self { store, config, counters: Counters::default() })
    }

    /// Whether lookups and writes are performed at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Fingerprints a request, or `None` if the cache is disabled or the
    /// parameters cannot be serialized.
    pub fn key_for(&self, model: &str, prompt: &str, params: &ModelParameters) -> Option<CacheKey> {
        if !self.config.enabled {
            return None;
        }
        match CacheKey::fingerprint(model, prompt, params) {
            Ok(key) => Some(key),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(model = %model, error = %e, "Could not fingerprint request; bypassing cache");
                None
            }
        }
    }

    /// Look up a live response.
    ///
    /// An expired entry is a miss and is removed on the way out, unless a
    /// fresh value replaced it in the meantime.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(entry.value)
            }
            Ok(Some(_)) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry expired");
                if let Ok(true) = self.store.remove_if_expired(key, now).await {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store a response with the configured TTL.
    pub async fn put(&self, key: CacheKey, value: String) {
        self.put_with_ttl(key, value, self.config.ttl()).await;
    }

    /// Store a response with an explicit TTL.
    pub async fn put_with_ttl(&self, key: CacheKey, value: String, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let display_key = key.clone();
        match self.store.put(key, CacheEntry::new(value, ttl)).await {
            Ok(evicted) => {
                if evicted > 0 {
                    self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                    debug!(evicted, "Evicted oldest cache entries to make room");
                }
                debug!(key = %display_key, ttl_secs = ttl.as_secs(), "Response cached");
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %display_key, error = %e, "Cache write failed; continuing without caching");
            }
        }
    }

    /// Remove a specific response from the cache.
    ///
    /// # Returns
    /// `true` if the entry was removed, `false` if it was not found or the
    /// store failed.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        match self.store.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Clear all responses from the cache.
    pub async fn clear(&self) {
        match self.store.clear().await {
            Ok(()) => info!("Cleared response cache"),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache clear failed");
            }
        }
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        match self.store.purge_expired(Instant::now()).await {
            Ok(purged) => {
                if purged > 0 {
                    self.counters.evictions.fetch_add(purged as u64, Ordering::Relaxed);
                    debug!(purged, "Swept expired cache entries");
                }
                purged
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache sweep failed");
                0
            }
        }
    }

    /// Spawn the periodic expiry sweep.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped; abort the handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.sweep().await;
            }
            debug!("Cache sweeper stopped");
        })
    }

    /// Get current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let cache_size = match self.store.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Could not read cache size");
                0
            }
        };
        CacheStats {
            total_hits: self.counters.hits.load(Ordering::Relaxed),
            total_misses: self.counters.misses.load(Ordering::Relaxed),
            total_evictions: self.counters.evictions.load(Ordering::Relaxed),
            total_errors: self.counters.errors.load(Ordering::Relaxed),
            cache_size,
        }
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
