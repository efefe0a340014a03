//! Cache Entry Module
//!
//! Defines individual cache entries with stale and expiry deadlines.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

// == Cache Entry ==
/// A single cached value together with its freshness metadata.
///
/// `stale_at` never lies after `expires_at`: the stale time is clamped to the
/// TTL at construction. A deadline of `None` means the entry never reaches that
/// state (an effectively infinite duration).
#[derive(Debug)]
pub struct CacheEntry<T> {
    /// The stored value
    pub value: T,
    /// When the key was first stored; survives revalidation
    pub created: Instant,
    /// Entry turns stale at this instant
    pub stale_at: Option<Instant>,
    /// Entry is discarded at this instant
    pub expires_at: Option<Instant>,
    /// Number of live reads plus carried-over recency from prior stores
    pub use_count: u64,
    /// Insertion sequence, used to break ties during eviction
    pub(crate) seq: u64,
    /// Self-expiry timer; aborted when the entry is dropped
    pub(crate) expiry_timer: Option<JoinHandle<()>>,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new entry stamped at `now`.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `stale_time` - Time until the entry is considered stale (clamped to `ttl`)
    /// * `ttl` - Time until the entry is discarded
    /// * `now` - Reference instant for both deadlines
    pub fn new(value: T, stale_time: Duration, ttl: Duration, now: Instant) -> Self {
        let stale_time = stale_time.min(ttl);

        Self {
            value,
            created: now,
            stale_at: now.checked_add(stale_time),
            expires_at: now.checked_add(ttl),
            use_count: 0,
            seq: 0,
            expiry_timer: None,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is live while `now < expires_at`; at the deadline itself it is
    /// already expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Is Stale ==
    /// Checks if the entry is past its stale threshold.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.stale_at {
            Some(stale) => now >= stale,
            None => false,
        }
    }

    /// Aborts the pending self-expiry timer, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
    }
}

impl<T: Clone> CacheEntry<T> {
    /// Captures the entry as seen at `now`.
    pub fn snapshot(&self, now: Instant) -> EntrySnapshot<T> {
        EntrySnapshot {
            value: self.value.clone(),
            created: self.created,
            stale_at: self.stale_at,
            expires_at: self.expires_at,
            use_count: self.use_count,
            is_stale: self.is_stale(now),
        }
    }
}

impl<T> Drop for CacheEntry<T> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

// == Entry Snapshot ==
/// Point-in-time copy of an entry handed out to readers.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<T> {
    pub value: T,
    pub created: Instant,
    pub stale_at: Option<Instant>,
    pub expires_at: Option<Instant>,
    pub use_count: u64,
    /// `now >= stale_at` at the time of the read
    pub is_stale: bool,
}

// == Utility Functions ==
/// Current instant on the runtime clock (pausable in tests).
pub fn now() -> Instant {
    Instant::now()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let now = now();
        let entry = CacheEntry::new("value", Duration::from_secs(10), Duration::from_secs(60), now);

        assert_eq!(entry.value, "value");
        assert_eq!(entry.created, now);
        assert_eq!(entry.use_count, 0);
        assert!(!entry.is_stale(now));
        assert!(!entry.is_expired(now));
    }

    #[test]
    fn test_stale_time_clamped_to_ttl() {
        let now = now();
        let entry = CacheEntry::new(
            "value",
            Duration::from_millis(1000),
            Duration::from_millis(500),
            now,
        );

        assert_eq!(entry.stale_at, entry.expires_at);
        assert_eq!(entry.stale_at, Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_zero_stale_time_is_immediately_stale() {
        let now = now();
        let entry = CacheEntry::new("value", Duration::ZERO, Duration::from_secs(60), now);

        assert!(entry.is_stale(now));
        assert!(!entry.is_expired(now));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = now();
        let entry = CacheEntry::new("value", Duration::ZERO, Duration::from_millis(100), now);

        assert!(!entry.is_expired(now + Duration::from_millis(99)));
        assert!(entry.is_expired(now + Duration::from_millis(100)), "Entry should be expired at boundary");
    }

    #[test]
    fn test_infinite_durations_never_expire() {
        let now = now();
        let entry = CacheEntry::new("value", Duration::MAX, Duration::MAX, now);

        assert!(entry.stale_at.is_none());
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(now + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_snapshot_reports_staleness() {
        let now = now();
        let entry = CacheEntry::new(7u32, Duration::from_secs(1), Duration::from_secs(5), now);

        assert!(!entry.snapshot(now).is_stale);
        let later = entry.snapshot(now + Duration::from_secs(2));
        assert!(later.is_stale);
        assert_eq!(later.value, 7);
        assert_eq!(later.created, now);
    }
}
