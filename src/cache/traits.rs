//! Core traits and types for the caching system.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// A typed cache key namespace.
///
/// Each implementor names the payload type stored under it, so a key for
/// "lists of board X" can only ever hand back lists.
pub trait CacheKey {
  /// Payload stored under this key.
  type Value: Serialize + DeserializeOwned;

  /// Namespace for the key (e.g., "lists", "labels").
  fn namespace() -> &'static str;

  /// Scope the entry belongs to (e.g., a board id).
  fn scope(&self) -> &str;

  /// Stable, fixed-length storage key derived from namespace and scope.
  fn cache_hash(&self) -> String {
    let input = format!("{}:{}", Self::namespace(), self.scope());

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable description for logs.
  fn description(&self) -> String {
    format!("{} for {}", Self::namespace(), self.scope())
  }
}

/// A cache read that found a live entry.
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
  pub value: T,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
  /// Time left before the entry expires
  pub expires_in: Duration,
}

/// Indicates where published data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  Cache,
}
