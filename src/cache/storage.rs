//! Cache storage trait and in-memory implementation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// A stored payload with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: Value,
  pub cached_at: DateTime<Utc>,
  pub expires_at: Instant,
}

impl CacheEntry {
  /// An entry is live strictly before its expiry instant.
  pub fn is_live(&self, now: Instant) -> bool {
    now < self.expires_at
  }
}

/// Trait for cache storage backends.
///
/// Backends only hold entries; expiry is judged by the caller against
/// `CacheEntry::expires_at`.
pub trait CacheStorage: Send + Sync {
  /// Store an entry, replacing whatever was under the key.
  fn store(&self, key: &str, entry: CacheEntry);

  /// Load the entry under a key, live or not.
  fn load(&self, key: &str) -> Option<CacheEntry>;

  /// Drop the entry under a key.
  fn remove(&self, key: &str);

  /// Physically drop every entry expired at `now`. Returns how many went.
  fn purge_expired(&self, now: Instant) -> usize;

  /// Number of resident entries, expired ones included.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn store(&self, _key: &str, _entry: CacheEntry) {
    // Discard
  }

  fn load(&self, _key: &str) -> Option<CacheEntry> {
    None // Always miss
  }

  fn remove(&self, _key: &str) {}

  fn purge_expired(&self, _now: Instant) -> usize {
    0
  }

  fn len(&self) -> usize {
    0
  }
}

/// Process-local map of entries.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  // Entries are plain data, so a poisoned lock still holds a usable map.
  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl CacheStorage for MemoryStorage {
  fn store(&self, key: &str, entry: CacheEntry) {
    self.entries().insert(key.to_string(), entry);
  }

  fn load(&self, key: &str) -> Option<CacheEntry> {
    self.entries().get(key).cloned()
  }

  fn remove(&self, key: &str) {
    self.entries().remove(key);
  }

  fn purge_expired(&self, now: Instant) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
  }

  fn len(&self) -> usize {
    self.entries().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;

  fn entry(value: Value, ttl: Duration) -> CacheEntry {
    CacheEntry {
      value,
      cached_at: Utc::now(),
      expires_at: Instant::now() + ttl,
    }
  }

  #[test]
  fn test_store_overwrites() {
    let storage = MemoryStorage::new();
    storage.store("k", entry(json!(1), Duration::from_secs(5)));
    storage.store("k", entry(json!(2), Duration::from_secs(5)));

    assert_eq!(storage.len(), 1);
    assert_eq!(storage.load("k").map(|e| e.value), Some(json!(2)));
  }

  #[test]
  fn test_purge_only_drops_expired() {
    let storage = MemoryStorage::new();
    storage.store("old", entry(json!("a"), Duration::ZERO));
    storage.store("new", entry(json!("b"), Duration::from_secs(60)));

    assert_eq!(storage.purge_expired(Instant::now()), 1);
    assert!(storage.load("old").is_none());
    assert!(storage.load("new").is_some());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.store("k", entry(json!(1), Duration::from_secs(5)));
    assert!(storage.load("k").is_none());
    assert!(storage.is_empty());
  }
}
