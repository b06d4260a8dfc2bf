//! Generic TTL caching layer.
//!
//! This module provides a domain-agnostic keyed cache that:
//! - Stores serialized payloads under typed key namespaces
//! - Treats any read at or after an entry's expiry as a miss
//! - Lets callers inject the storage backend (in-memory or disabled)

mod layer;
mod storage;
mod traits;

pub use layer::TtlCache;
pub use storage::{CacheEntry, CacheStorage, MemoryStorage, NoopStorage};
pub use traits::{CacheHit, CacheKey, CacheSource};
