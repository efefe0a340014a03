//! Eviction Sweep Task
//!
//! Background task that periodically trims a cache store to its size bound.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::WeakCacheStore;

/// Spawns a background task that periodically runs [`CacheStore::cleanup`].
///
/// The task only holds a weak reference to the store: once every strong handle
/// is gone the next tick finds nothing to upgrade and the loop ends.
///
/// # Arguments
/// * `store` - Weak reference to the cache
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// [`CacheStore::cleanup`]: crate::cache::CacheStore::cleanup
pub fn spawn_cleanup_task<T>(store: WeakCacheStore<T>, interval: Duration) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        debug!(
            interval_ms = interval.as_millis() as u64,
            "Starting cache eviction sweep"
        );

        loop {
            tokio::time::sleep(interval).await;

            let Some(store) = store.upgrade() else {
                debug!("Cache store dropped, stopping eviction sweep");
                break;
            };

            let removed = store.cleanup();
            if removed > 0 {
                info!(removed, remaining = store.len(), "Cache sweep removed entries");
            } else {
                debug!("Cache sweep: nothing to remove");
            }
        }
    })
}
