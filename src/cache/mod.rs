//! Cache Module
//!
//! Provides in-memory caching with stale-while-revalidate freshness, TTL
//! expiration and batched eviction.

mod entry;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use entry::{now, CacheEntry, EntrySnapshot};
pub use policy::{EvictionKind, EvictionPolicy, DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_SIZE};
pub use stats::CacheStats;
pub use store::{CacheBackend, CacheEvent, CacheStore, WeakCacheStore};
