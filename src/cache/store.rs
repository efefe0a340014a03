//! Cache Store Module
//!
//! Main cache engine: TTL and stale-aware storage with per-entry expiry timers,
//! a batched size-bounded eviction sweep and change notification.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::entry::now;
use crate::cache::{CacheEntry, CacheStats, EntrySnapshot, EvictionKind, EvictionPolicy};
use crate::error::ConfigError;
use crate::tasks::spawn_cleanup_task;

/// Capacity of the change notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// == Cache Event ==
/// Change notification emitted after every effective mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Stored(String),
    Invalidated(String),
    Expired(String),
    Evicted(Vec<String>),
    Cleared,
}

impl CacheEvent {
    /// Returns true if the event concerns `key`.
    pub fn affects(&self, key: &str) -> bool {
        match self {
            CacheEvent::Stored(k) | CacheEvent::Invalidated(k) | CacheEvent::Expired(k) => k == key,
            CacheEvent::Evicted(keys) => keys.iter().any(|k| k == key),
            CacheEvent::Cleared => true,
        }
    }
}

// == Cache Backend ==
/// Capability surface any cache backend exposes to the request pipeline.
///
/// `get` is a recording read: it bumps the entry's use count (LRU recency) and
/// hit/miss statistics. `peek` is the side-effect-free variant.
pub trait CacheBackend<T>: Send + Sync {
    fn get(&self, key: &str) -> Option<EntrySnapshot<T>>;
    fn peek(&self, key: &str) -> Option<EntrySnapshot<T>>;
    fn store(&self, key: &str, value: T, stale_time: Option<Duration>, ttl: Option<Duration>);
    fn invalidate(&self, key: &str);
    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;
}

struct StoreState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    stats: CacheStats,
    next_seq: u64,
}

struct StoreInner<T> {
    state: Mutex<StoreState<T>>,
    policy: EvictionPolicy,
    default_ttl: Duration,
    default_stale_time: Duration,
    events: broadcast::Sender<CacheEvent>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for StoreInner<T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

// == Cache Store ==
/// Shared handle to an in-memory cache.
///
/// Cloning is cheap and every clone refers to the same entries. The periodic
/// eviction sweep only holds a weak reference, so it stops on its own once the
/// last handle is dropped; `dispose` stops it eagerly.
pub struct CacheStore<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("policy", &self.inner.policy)
            .field("default_ttl", &self.inner.default_ttl)
            .field("default_stale_time", &self.inner.default_stale_time)
            .field("len", &self.inner.state.lock().entries.len())
            .finish()
    }
}

/// Non-owning reference to a [`CacheStore`].
pub struct WeakCacheStore<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T> WeakCacheStore<T> {
    pub fn upgrade(&self) -> Option<CacheStore<T>> {
        self.inner.upgrade().map(|inner| CacheStore { inner })
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a new store and, when called inside a tokio runtime, starts its
    /// eviction sweep.
    ///
    /// # Arguments
    /// * `policy` - Eviction policy; `max_size` must be non-zero
    /// * `default_ttl` - TTL for stores that do not supply one
    /// * `default_stale_time` - Stale time for stores that do not supply one
    pub fn new(
        policy: EvictionPolicy,
        default_ttl: Duration,
        default_stale_time: Duration,
    ) -> Result<Self, ConfigError> {
        policy.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    entries: HashMap::new(),
                    stats: CacheStats::new(),
                    next_seq: 0,
                }),
                policy,
                default_ttl,
                default_stale_time,
                events,
                sweeper: Mutex::new(None),
            }),
        };

        if Handle::try_current().is_ok() {
            let sweeper = spawn_cleanup_task(store.downgrade(), policy.check_interval);
            *store.inner.sweeper.lock() = Some(sweeper);
        } else {
            debug!("No async runtime available, eviction sweep disabled");
        }

        Ok(store)
    }

    pub fn downgrade(&self) -> WeakCacheStore<T> {
        WeakCacheStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // == Get ==
    /// Reads a live entry.
    ///
    /// Returns None if the key is absent or `now >= expires_at` (an expired
    /// entry is removed on the spot). A hit increments the entry's use count,
    /// which is what the LRU sweep orders by: this read is deliberately not
    /// a pure query.
    pub fn get(&self, key: &str) -> Option<EntrySnapshot<T>> {
        let now = now();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        match state.entries.get_mut(key) {
            None => {
                state.stats.record_miss();
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.use_count += 1;
                let snapshot = entry.snapshot(now);
                state.stats.record_hit(snapshot.is_stale);
                return Some(snapshot);
            }
            Some(_) => {}
        }

        state.entries.remove(key);
        state.stats.record_miss();
        state.stats.record_expirations(1);
        let remaining = state.entries.len();
        state.stats.set_total_entries(remaining);
        drop(guard);

        debug!(key, "Cache entry expired on read");
        self.emit(CacheEvent::Expired(key.to_string()));
        None
    }

    // == Peek ==
    /// Reads a live entry without touching recency or statistics.
    pub fn peek(&self, key: &str) -> Option<EntrySnapshot<T>> {
        let now = now();
        let state = self.inner.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.snapshot(now))
    }

    // == Store ==
    /// Inserts or replaces an entry.
    ///
    /// The effective stale time is `min(stale_time, ttl)`. Replacing a live entry
    /// keeps its `created` instant and carries its use count forward (plus one),
    /// while both deadlines restart from now. The previous expiry timer is
    /// cancelled and a new one scheduled.
    pub fn store(
        &self,
        key: impl Into<String>,
        value: T,
        stale_time: Option<Duration>,
        ttl: Option<Duration>,
    ) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.inner.default_ttl);
        let stale_time = stale_time.unwrap_or(self.inner.default_stale_time);
        let now = now();

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut entry = CacheEntry::new(value, stale_time, ttl, now);

        match state.entries.get(&key).filter(|prev| !prev.is_expired(now)) {
            Some(prev) => {
                entry.created = prev.created;
                entry.use_count = prev.use_count + 1;
                entry.seq = prev.seq;
            }
            None => {
                entry.seq = state.next_seq;
                state.next_seq += 1;
            }
        }

        if let Some(deadline) = entry.expires_at {
            entry.expiry_timer = self.schedule_expiry(key.clone(), deadline);
        }

        // Dropping the replaced entry aborts its timer.
        state.entries.insert(key.clone(), entry);
        let total = state.entries.len();
        state.stats.set_total_entries(total);
        drop(guard);

        debug!(
            key = %key,
            stale_ms = stale_time.min(ttl).as_millis() as u64,
            ttl_ms = ttl.as_millis() as u64,
            "Stored cache entry"
        );
        self.emit(CacheEvent::Stored(key));
    }

    // == Invalidate ==
    /// Removes an entry and cancels its timer. No-op if the key is absent.
    pub fn invalidate(&self, key: &str) {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.entries.remove(key);
            let total = state.entries.len();
            state.stats.set_total_entries(total);
            removed
        };

        if removed.is_some() {
            debug!(key, "Invalidated cache entry");
            self.emit(CacheEvent::Invalidated(key.to_string()));
        }
    }

    // == Clear ==
    /// Removes every entry.
    pub fn clear(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            let drained: Vec<_> = state.entries.drain().collect();
            state.stats.set_total_entries(0);
            drained
        };
        info!(count = drained.len(), "Cleared cache");
        drop(drained);
        self.emit(CacheEvent::Cleared);
    }

    // == Cleanup ==
    /// Runs one sweep and returns the number of entries removed.
    ///
    /// Expired entries are purged first. Then, if the store holds more than
    /// `max_size` entries, all entries are ordered by the configured policy
    /// (`lru`: ascending use count, `oldest`: ascending creation) and the lower
    /// part is evicted so that exactly `max_size / 2` remain.
    pub fn cleanup(&self) -> usize {
        let now = now();
        let policy = self.inner.policy;

        let (expired, evicted) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                state.entries.remove(key);
            }
            state.stats.record_expirations(expired.len());

            let mut evicted = Vec::new();
            if state.entries.len() > policy.max_size {
                let mut ranked: Vec<(&String, &CacheEntry<T>)> = state.entries.iter().collect();
                match policy.kind {
                    EvictionKind::Lru => ranked.sort_by(|(_, a), (_, b)| {
                        a.use_count.cmp(&b.use_count).then(a.seq.cmp(&b.seq))
                    }),
                    EvictionKind::Oldest => ranked.sort_by(|(_, a), (_, b)| {
                        a.created.cmp(&b.created).then(a.seq.cmp(&b.seq))
                    }),
                }
                let excess = ranked.len() - policy.retain_count();
                evicted = ranked
                    .into_iter()
                    .take(excess)
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &evicted {
                    state.entries.remove(key);
                }
                state.stats.record_evictions(evicted.len());
            }

            let total = state.entries.len();
            state.stats.set_total_entries(total);
            (expired, evicted)
        };

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                policy = %policy.kind,
                max_size = policy.max_size,
                "Eviction sweep trimmed cache"
            );
        }

        let removed = expired.len() + evicted.len();
        for key in expired {
            self.emit(CacheEvent::Expired(key));
        }
        if !evicted.is_empty() {
            self.emit(CacheEvent::Evicted(evicted));
        }
        removed
    }

    // == Dispose ==
    /// Stops the eviction sweep and cancels every pending expiry timer.
    ///
    /// Entries remain readable; expiry is then enforced lazily on read.
    pub fn dispose(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        let mut state = self.inner.state.lock();
        for entry in state.entries.values_mut() {
            entry.cancel_timer();
        }
        debug!("Cache store disposed");
    }

    // == Subscribe ==
    /// Receives a [`CacheEvent`] after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.inner.policy
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().entries.keys().cloned().collect()
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is not an error.
        let _ = self.inner.events.send(event);
    }

    fn schedule_expiry(&self, key: String, deadline: Instant) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let weak = self.downgrade();

        Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(store) = weak.upgrade() {
                store.expire(&key);
            }
        }))
    }

    /// Timer callback. The entry may have been replaced since the timer was
    /// armed, so it is only removed if it really is past its deadline.
    fn expire(&self, key: &str) {
        let now = now();
        let removed = {
            let mut state = self.inner.state.lock();
            let is_expired = state
                .entries
                .get(key)
                .is_some_and(|entry| entry.is_expired(now));
            if !is_expired {
                return;
            }
            let mut removed = state.entries.remove(key);
            if let Some(entry) = removed.as_mut() {
                // We are running inside this timer; nothing to abort.
                entry.expiry_timer = None;
            }
            state.stats.record_expirations(1);
            let total = state.entries.len();
            state.stats.set_total_entries(total);
            removed
        };

        if removed.is_some() {
            debug!(key, "Cache entry expired");
            self.emit(CacheEvent::Expired(key.to_string()));
        }
    }
}

impl<T> CacheBackend<T> for CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<EntrySnapshot<T>> {
        CacheStore::get(self, key)
    }

    fn peek(&self, key: &str) -> Option<EntrySnapshot<T>> {
        CacheStore::peek(self, key)
    }

    fn store(&self, key: &str, value: T, stale_time: Option<Duration>, ttl: Option<Duration>) {
        CacheStore::store(self, key, value, stale_time, ttl)
    }

    fn invalidate(&self, key: &str) {
        CacheStore::invalidate(self, key)
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        CacheStore::subscribe(self)
    }
}
