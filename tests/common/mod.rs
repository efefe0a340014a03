//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use resource_cache::{
    BreakerSetting, CircuitBreakerConfig, CoordinatorConfig, FetchError, ResourceCoordinator,
    ResourceRequest, ResourceResponse, Transport,
};

/// Replays queued outcomes in order and records every request it saw.
/// An exhausted queue answers with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<ResourceResponse, FetchError>>>,
    requests: Mutex<Vec<ResourceRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn push_ok(&self, response: ResourceResponse) {
        self.outcomes.lock().push_back(Ok(response));
    }

    pub fn push_err(&self, err: FetchError) {
        self.outcomes.lock().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ResourceRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ResourceRequest) -> Result<ResourceResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Network("no scripted response".into())))
    }
}

pub fn breaker_config(threshold: u32, reset_timeout: Duration) -> CoordinatorConfig {
    CoordinatorConfig {
        circuit_breaker: BreakerSetting::Enabled(CircuitBreakerConfig::new(
            threshold,
            reset_timeout,
        )),
        ..CoordinatorConfig::default()
    }
}

pub fn coordinator(config: CoordinatorConfig, transport: &Arc<ScriptedTransport>) -> ResourceCoordinator {
    ResourceCoordinator::new(config, transport.clone()).unwrap()
}
