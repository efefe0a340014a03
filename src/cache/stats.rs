//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Subset of hits that were past their stale threshold
    pub stale_hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Entries removed by the size-bounded sweep
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self, stale: bool) {
        self.hits += 1;
        if stale {
            self.stale_hits += 1;
        }
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
