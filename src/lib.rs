//! Resource Cache - client-side resource access coordination
//!
//! Stale-while-revalidate caching with batched eviction, conditional
//! revalidation, a failure-driven circuit breaker and in-flight request
//! deduplication, composed behind [`ResourceCoordinator`].

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dedupe;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod resilience;
pub mod tasks;
pub mod transport;

pub use api::AppState;
pub use config::{Config, CoordinatorConfig};
pub use coordinator::{PrefetchOutcome, ResourceCoordinator, ResourceHandle, ResourceState};
pub use error::{ConfigError, FetchError};
pub use pipeline::{CacheOptions, ResourceRequest, ResourceResponse, ResponseSource, Transport};
pub use resilience::{BreakerSetting, BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
pub use tasks::spawn_cleanup_task;
pub use transport::ReqwestTransport;
