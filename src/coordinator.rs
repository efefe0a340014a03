//! Caller-facing resource coordinator.
//!
//! Composes the cache store, the caching interceptor, the circuit breaker and
//! request deduplication behind a single "fetch with policy" operation, and
//! publishes per-key [`ResourceState`] to subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEvent, CacheStats, CacheStore};
use crate::config::CoordinatorConfig;
use crate::dedupe::DedupeCoordinator;
use crate::error::{ConfigError, FetchError};
use crate::pipeline::{
    CacheInterceptor, CacheLookup, InterceptorConfig, ResourceRequest, ResourceResponse,
    Retention, Transport,
};
use crate::resilience::{Breaker, BreakerPermit, BreakerStatus};

// == Resource State ==
/// What a subscriber sees for one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceState {
    pub value: Option<ResourceResponse>,
    pub is_stale: bool,
    /// A network request for this key is in flight
    pub is_loading: bool,
    pub error: Option<FetchError>,
    /// The breaker suppressed the last request
    pub disabled: bool,
}

/// Live view of one key's [`ResourceState`].
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    key: String,
    receiver: watch::Receiver<ResourceState>,
}

impl ResourceHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self) -> ResourceState {
        self.receiver.borrow().clone()
    }

    /// Waits for the next update. None once the coordinator is gone.
    pub async fn changed(&mut self) -> Option<ResourceState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Waits until the state satisfies `predicate`, checking the current
    /// state first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ResourceState) -> bool,
    ) -> Option<ResourceState> {
        self.receiver
            .wait_for(predicate)
            .await
            .ok()
            .map(|state| state.clone())
    }
}

/// Result of a best-effort prefetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchOutcome {
    Completed,
    /// Request carried no cache options
    NoCachePolicy,
    NetworkConstrained,
    /// Fetch failed; the error was logged
    Failed,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    store: CacheStore<ResourceResponse>,
    interceptor: CacheInterceptor,
    breaker: Arc<dyn Breaker>,
    dedupe: DedupeCoordinator<ResourceResponse, FetchError>,
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<HashMap<String, watch::Sender<ResourceState>>>,
    /// Fetches currently running per key
    loading: Mutex<HashMap<String, usize>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.get_mut().take() {
            forwarder.abort();
        }
    }
}

impl CoordinatorInner {
    /// Applies `update` to the key's state if anyone subscribed to it.
    fn publish(&self, key: &str, update: impl FnOnce(&mut ResourceState)) {
        if let Some(sender) = self.subscriptions.lock().get(key) {
            sender.send_modify(update);
        }
    }

    /// Re-reads affected keys from the store. `None` refreshes every key.
    fn refresh_subscribers(&self, event: Option<&CacheEvent>) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|_, sender| !sender.is_closed());

        for (key, sender) in subscriptions.iter() {
            if event.is_some_and(|event| !event.affects(key)) {
                continue;
            }
            let entry = self.store.peek(key);
            sender.send_modify(|state| match entry {
                Some(entry) => {
                    state.value = Some(entry.value);
                    state.is_stale = entry.is_stale;
                }
                None => {
                    state.value = None;
                    state.is_stale = false;
                }
            });
        }
    }

    fn begin_loading<'a>(&'a self, key: &'a str) -> LoadingGuard<'a> {
        *self.loading.lock().entry(key.to_string()).or_default() += 1;
        LoadingGuard {
            inner: self,
            key,
            finished: false,
        }
    }

    /// Returns true while other fetches for `key` are still running.
    fn end_loading(&self, key: &str) -> bool {
        let mut loading = self.loading.lock();
        let Some(count) = loading.get_mut(key) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            loading.remove(key);
            return false;
        }
        true
    }

    fn refresh_disabled(&self) {
        let blocking = self.breaker.is_blocking();
        for sender in self.subscriptions.lock().values() {
            sender.send_if_modified(|state| {
                let changed = state.disabled != blocking;
                state.disabled = blocking;
                changed
            });
        }
    }
}

/// One running fetch for a key. A fetch dropped mid-flight still ends its
/// share of the loading state.
struct LoadingGuard<'a> {
    inner: &'a CoordinatorInner,
    key: &'a str,
    finished: bool,
}

impl LoadingGuard<'_> {
    /// Ends this fetch; true if the key is still loading elsewhere.
    fn finish(mut self) -> bool {
        self.finished = true;
        self.inner.end_loading(self.key)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.inner.end_loading(self.key) {
            self.inner.publish(self.key, |state| state.is_loading = false);
        }
    }
}

// == Resource Coordinator ==
/// Shared handle; clones drive the same cache, breaker and registry.
#[derive(Clone)]
pub struct ResourceCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for ResourceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCoordinator")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("breaker", &self.inner.breaker)
            .field("dedupe", &self.inner.dedupe)
            .finish_non_exhaustive()
    }
}

impl ResourceCoordinator {
    // == Constructor ==
    /// Builds the store, breaker and interceptor described by `config`.
    ///
    /// Inside a tokio runtime this also starts the eviction sweep and the task
    /// that forwards store changes to subscribers.
    pub fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let store = CacheStore::new(config.eviction, config.ttl, config.stale_time)?;
        let breaker = config.circuit_breaker.build(&config.name)?;
        let interceptor = CacheInterceptor::new(
            Arc::new(store.clone()),
            InterceptorConfig {
                allowed_methods: config.allowed_methods.clone(),
                defaults: Retention::new(config.stale_time, config.ttl),
                key_fn: config.cache_key.clone(),
            },
        );
        let dedupe = DedupeCoordinator::new(config.dedupe_allowed_methods.clone());

        let events = store.subscribe();
        let inner = Arc::new(CoordinatorInner {
            config,
            store,
            interceptor,
            breaker,
            dedupe,
            transport,
            subscriptions: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            forwarder: Mutex::new(None),
        });

        if let Ok(handle) = Handle::try_current() {
            let forwarder = handle.spawn(forward_events(Arc::downgrade(&inner), events));
            *inner.forwarder.lock() = Some(forwarder);
        }

        info!(
            name = %inner.config.name,
            max_size = inner.config.eviction.max_size,
            eviction = %inner.config.eviction.kind,
            ttl_ms = inner.config.ttl.as_millis() as u64,
            stale_time_ms = inner.config.stale_time.as_millis() as u64,
            "Resource coordinator initialized"
        );

        Ok(Self { inner })
    }

    pub fn cache_key(&self, request: &ResourceRequest) -> String {
        self.inner.interceptor.cache_key(request)
    }

    // == Fetch ==
    /// Fetches `request` through cache, breaker and deduplication.
    ///
    /// A fresh entry is returned without consulting the breaker. Otherwise the
    /// request needs admission; while the breaker is blocking it fails with
    /// [`FetchError::CircuitOpen`] and never reaches the transport. 4xx/5xx
    /// answers come back as [`FetchError::Status`].
    ///
    /// Dropping the returned future is safe: an admitted trial request that
    /// never completes hands its slot back to the breaker.
    pub async fn fetch(&self, request: ResourceRequest) -> Result<ResourceResponse, FetchError> {
        let key = self.cache_key(&request);
        let lookup = self.inner.interceptor.lookup(&request);

        if let CacheLookup::Fresh { entry, .. } = &lookup {
            debug!(key = %key, "Serving fresh cache entry");
            return Ok(CacheInterceptor::serve_cached(entry));
        }

        let loading = self.inner.begin_loading(&key);
        let stale_value = lookup.entry().map(CacheInterceptor::serve_cached);
        self.inner.publish(&key, |state| {
            if let Some(value) = stale_value {
                state.value = Some(value);
                state.is_stale = true;
            }
            state.is_loading = true;
        });

        let Some(permit) = BreakerPermit::acquire(&self.inner.breaker) else {
            warn!(key = %key, status = %self.inner.breaker.status(), "Request suppressed by circuit breaker");
            let err = FetchError::CircuitOpen { key: key.clone() };
            let still_loading = loading.finish();
            self.inner.publish(&key, |state| {
                state.is_loading = still_loading;
                state.disabled = true;
                state.error = Some(err.clone());
            });
            return Err(err);
        };

        // A joined request settles through the call it joined; its own
        // permit is dropped unused.
        let result = if self.inner.dedupe.should_dedupe(&request) {
            let this = self.clone();
            self.inner
                .dedupe
                .execute(&key, move || async move {
                    this.network_call(request, lookup, permit).await
                })
                .await
        } else {
            self.network_call(request, lookup, permit).await
        };

        let still_loading = loading.finish();
        let blocking = self.inner.breaker.is_blocking();
        match &result {
            Ok(response) => self.inner.publish(&key, |state| {
                state.value = Some(response.clone());
                state.is_stale = false;
                state.is_loading = still_loading;
                state.error = None;
                state.disabled = blocking;
            }),
            Err(err) => self.inner.publish(&key, |state| {
                state.is_loading = still_loading;
                state.error = Some(err.clone());
                state.disabled = blocking;
            }),
        }
        result
    }

    /// Sends one admitted request and reports its outcome to the breaker.
    async fn network_call(
        &self,
        request: ResourceRequest,
        lookup: CacheLookup,
        permit: BreakerPermit,
    ) -> Result<ResourceResponse, FetchError> {
        let prepared = self.inner.interceptor.prepare(request.clone(), &lookup);

        let response = match self.inner.transport.send(prepared).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %request.url, error = %err, "Request failed");
                permit.fail();
                return Err(err);
            }
        };

        let outcome = self
            .inner
            .interceptor
            .complete(&request, &lookup, response)
            .error_for_status();
        match &outcome {
            Err(err) if err.is_upstream_failure() => {
                warn!(url = %request.url, error = %err, "Upstream error");
                permit.fail();
            }
            // The origin answered, so a 4xx still counts as healthy.
            _ => permit.success(),
        }
        outcome
    }

    // == Subscribe ==
    /// Live state for the request's key.
    ///
    /// Starts a background fetch unless a fresh entry is already cached (and
    /// only when called inside a tokio runtime).
    pub fn subscribe(&self, request: ResourceRequest) -> ResourceHandle {
        let mut handle = self.watch(self.cache_key(&request));
        let fresh = self.inner.interceptor.is_cacheable(&request)
            && self
                .inner
                .store
                .peek(&handle.key)
                .is_some_and(|entry| !entry.is_stale);
        if fresh {
            return handle;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(key = %handle.key, "No async runtime available, subscription will not fetch");
            return handle;
        };

        // Mark loading before the task runs so the first observed state is
        // never an idle miss.
        self.inner.publish(&handle.key, |state| state.is_loading = true);
        handle.receiver.mark_unchanged();

        let this = self.clone();
        runtime.spawn(async move {
            if let Err(err) = this.fetch(request).await {
                debug!(error = %err, "Subscription fetch failed");
            }
        });
        handle
    }

    /// Observes `key` without triggering a fetch.
    pub fn watch(&self, key: impl Into<String>) -> ResourceHandle {
        let key = key.into();
        let mut subscriptions = self.inner.subscriptions.lock();
        subscriptions.retain(|_, sender| !sender.is_closed());

        let receiver = match subscriptions.get(&key) {
            Some(sender) => sender.subscribe(),
            None => {
                let initial = match self.inner.store.peek(&key) {
                    Some(entry) => ResourceState {
                        value: Some(entry.value),
                        is_stale: entry.is_stale,
                        disabled: self.inner.breaker.is_blocking(),
                        ..ResourceState::default()
                    },
                    None => ResourceState {
                        disabled: self.inner.breaker.is_blocking(),
                        ..ResourceState::default()
                    },
                };
                let (sender, receiver) = watch::channel(initial);
                subscriptions.insert(key.clone(), sender);
                receiver
            }
        };

        ResourceHandle { key, receiver }
    }

    // == Invalidate ==
    pub fn invalidate(&self, key: &str) {
        self.inner.store.invalidate(key);
    }

    // == Prefetch ==
    /// Warms the cache for `request`. Never returns an error: failures are
    /// logged and reported as [`PrefetchOutcome::Failed`].
    pub async fn prefetch(&self, request: ResourceRequest) -> PrefetchOutcome {
        let key = self.cache_key(&request);
        if request.cache.is_none() {
            debug!(key = %key, "Prefetch declined, no cache policy");
            return PrefetchOutcome::NoCachePolicy;
        }
        if self.inner.config.is_network_constrained() {
            debug!(key = %key, "Prefetch declined, network constrained");
            return PrefetchOutcome::NetworkConstrained;
        }

        match self.fetch(request).await {
            Ok(_) => PrefetchOutcome::Completed,
            Err(err) => {
                warn!(key = %key, error = %err, "Prefetch failed");
                PrefetchOutcome::Failed
            }
        }
    }

    // == Breaker Control ==
    /// Manual trial: lets one request through a blocking breaker.
    pub fn retry(&self) -> BreakerStatus {
        self.inner.breaker.half_open();
        self.inner.refresh_disabled();
        self.inner.breaker.status()
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.inner.breaker.status()
    }

    pub fn breaker(&self) -> &Arc<dyn Breaker> {
        &self.inner.breaker
    }

    // == Accessors ==
    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    pub fn store(&self) -> &CacheStore<ResourceResponse> {
        &self.inner.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.dedupe.in_flight_count()
    }

    /// Stops every background task: sweep, expiry timers, breaker reset
    /// timer and the subscriber forwarder.
    pub fn dispose(&self) {
        if let Some(forwarder) = self.inner.forwarder.lock().take() {
            forwarder.abort();
        }
        self.inner.store.dispose();
        self.inner.breaker.dispose();
        info!(name = %self.inner.config.name, "Resource coordinator disposed");
    }
}

/// Mirrors store changes into subscriber state until the coordinator is gone.
async fn forward_events(inner: Weak<CoordinatorInner>, mut events: broadcast::Receiver<CacheEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Subscriber forwarder lagged, refreshing all keys");
                None
            }
            Err(RecvError::Closed) => break,
        };

        let Some(coordinator) = inner.upgrade() else {
            break;
        };
        coordinator.refresh_subscribers(event.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::ScriptedTransport;
    use crate::resilience::{BreakerSetting, CircuitBreakerConfig};
    use http::StatusCode;
    use std::time::Duration;

    fn coordinator(transport: Arc<ScriptedTransport>) -> ResourceCoordinator {
        let config = CoordinatorConfig {
            circuit_breaker: BreakerSetting::Enabled(CircuitBreakerConfig::new(
                2,
                Duration::from_secs(10),
            )),
            ..CoordinatorConfig::default()
        };
        ResourceCoordinator::new(config, transport).unwrap()
    }

    fn users() -> ResourceRequest {
        ResourceRequest::get("https://api.test/users").cached()
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_transport() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(ResourceResponse::ok("users"));
        let coordinator = coordinator(transport.clone());

        coordinator.fetch(users()).await.unwrap();
        let second = coordinator.fetch(users()).await.unwrap();

        assert_eq!(second.body, "users");
        assert_eq!(transport.calls(), 1);
        assert_eq!(coordinator.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_server_errors_trip_breaker() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(ResourceResponse::new(StatusCode::BAD_GATEWAY));
        transport.push_err(FetchError::Network("reset".into()));
        let coordinator = coordinator(transport.clone());

        assert!(coordinator.fetch(users()).await.is_err());
        assert!(coordinator.fetch(users()).await.is_err());
        assert_eq!(coordinator.breaker_status(), BreakerStatus::Blocking);

        let blocked = coordinator.fetch(users()).await;
        assert!(matches!(blocked, Err(FetchError::CircuitOpen { .. })));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_client_error_does_not_trip_breaker() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(ResourceResponse::new(StatusCode::NOT_FOUND));
        transport.push_ok(ResourceResponse::new(StatusCode::NOT_FOUND));
        let coordinator = coordinator(transport);

        for _ in 0..2 {
            let err = coordinator.fetch(users()).await.unwrap_err();
            assert!(matches!(err, FetchError::Status { status: StatusCode::NOT_FOUND, .. }));
        }
        assert_eq!(coordinator.breaker_status(), BreakerStatus::Operational);
        assert!(coordinator.store().is_empty());
    }

    #[tokio::test]
    async fn test_retry_lets_trial_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_err(FetchError::Network("down".into()));
        transport.push_err(FetchError::Network("down".into()));
        transport.push_ok(ResourceResponse::ok("back"));
        let coordinator = coordinator(transport.clone());

        let _ = coordinator.fetch(users()).await;
        let _ = coordinator.fetch(users()).await;
        assert_eq!(coordinator.retry(), BreakerStatus::Trial);

        let response = coordinator.fetch(users()).await.unwrap();
        assert_eq!(response.body, "back");
        assert_eq!(coordinator.breaker_status(), BreakerStatus::Operational);
    }

    #[tokio::test]
    async fn test_prefetch_declines_without_cache_policy() {
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = coordinator(transport.clone());

        let outcome = coordinator
            .prefetch(ResourceRequest::get("https://api.test/users"))
            .await;

        assert_eq!(outcome, PrefetchOutcome::NoCachePolicy);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_prefetch_declines_on_constrained_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = CoordinatorConfig {
            network_constrained: Some(Arc::new(|| true)),
            ..CoordinatorConfig::default()
        };
        let coordinator = ResourceCoordinator::new(config, transport.clone()).unwrap();

        assert_eq!(
            coordinator.prefetch(users()).await,
            PrefetchOutcome::NetworkConstrained
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_prefetch_swallows_errors() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_err(FetchError::Network("offline".into()));
        let coordinator = coordinator(transport);

        assert_eq!(coordinator.prefetch(users()).await, PrefetchOutcome::Failed);
    }

    #[tokio::test]
    async fn test_watch_reflects_invalidation() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(ResourceResponse::ok("users"));
        let coordinator = coordinator(transport);
        let key = coordinator.cache_key(&users());

        coordinator.fetch(users()).await.unwrap();
        let mut handle = coordinator.watch(key.clone());
        assert!(handle.current().value.is_some());

        coordinator.invalidate(&key);
        let state = handle.wait_for(|state| state.value.is_none()).await.unwrap();
        assert!(!state.is_stale);
    }

    #[test]
    fn test_construction_without_runtime() {
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = coordinator(transport);
        assert_eq!(coordinator.breaker_status(), BreakerStatus::Operational);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let config = CoordinatorConfig {
            eviction: crate::cache::EvictionPolicy {
                max_size: 0,
                ..Default::default()
            },
            ..CoordinatorConfig::default()
        };
        let result = ResourceCoordinator::new(config, Arc::new(ScriptedTransport::new()));
        assert!(matches!(result, Err(ConfigError::InvalidMaxSize(0))));
    }
}
