//! TTL cache that sits on top of a storage backend.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::storage::{CacheEntry, CacheStorage, MemoryStorage, NoopStorage};
use super::traits::{CacheHit, CacheKey};

/// Typed key/TTL cache.
///
/// Cloning is cheap and clones share the same storage, which is how the
/// board store and anything else in the process see one another's writes.
/// A miss is a normal outcome, so nothing here returns an error.
#[derive(Clone)]
pub struct TtlCache {
  storage: Arc<dyn CacheStorage>,
  /// TTL used by `set_default`
  default_ttl: Duration,
}

impl TtlCache {
  /// Create a new cache with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      default_ttl: Duration::from_secs(60),
    }
  }

  /// In-memory cache.
  pub fn in_memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  /// Cache that never retains anything.
  pub fn disabled() -> Self {
    Self::new(NoopStorage)
  }

  /// Set the TTL used by `set_default`.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Store `value` under `key` for `ttl`, replacing any prior entry.
  pub fn set<K: CacheKey>(&self, key: &K, value: &K::Value, ttl: Duration) {
    let value = match serde_json::to_value(value) {
      Ok(value) => value,
      Err(e) => {
        warn!("Not caching {}: {}", key.description(), e);
        return;
      }
    };

    self.storage.store(
      &key.cache_hash(),
      CacheEntry {
        value,
        cached_at: Utc::now(),
        expires_at: Instant::now() + ttl,
      },
    );
    debug!("Cached {} for {:?}", key.description(), ttl);
  }

  /// `set` with the default TTL.
  pub fn set_default<K: CacheKey>(&self, key: &K, value: &K::Value) {
    self.set(key, value, self.default_ttl);
  }

  /// Value under `key` if it has not expired.
  pub fn get<K: CacheKey>(&self, key: &K) -> Option<K::Value> {
    self.entry(key).map(|hit| hit.value)
  }

  /// Live entry under `key`, with its metadata.
  pub fn entry<K: CacheKey>(&self, key: &K) -> Option<CacheHit<K::Value>> {
    let entry = self.storage.load(&key.cache_hash())?;
    let now = Instant::now();
    if !entry.is_live(now) {
      debug!("Cache entry for {} expired", key.description());
      return None;
    }

    match serde_json::from_value(entry.value) {
      Ok(value) => Some(CacheHit {
        value,
        cached_at: entry.cached_at,
        expires_in: entry.expires_at - now,
      }),
      Err(e) => {
        // Treat a payload of the wrong shape as a miss
        warn!("Discarding cached {}: {}", key.description(), e);
        None
      }
    }
  }

  /// Whether a live entry exists for `key`.
  pub fn is_fresh<K: CacheKey>(&self, key: &K) -> bool {
    self
      .storage
      .load(&key.cache_hash())
      .is_some_and(|entry| entry.is_live(Instant::now()))
  }

  pub fn invalidate<K: CacheKey>(&self, key: &K) {
    self.storage.remove(&key.cache_hash());
  }

  /// Drop expired entries from storage.
  pub fn purge_expired(&self) -> usize {
    self.storage.purge_expired(Instant::now())
  }
}

impl std::fmt::Debug for TtlCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TtlCache")
      .field("entries", &self.storage.len())
      .field("default_ttl", &self.default_ttl)
      .finish_non_exhaustive()
  }
}
