//! Configuration Module
//!
//! Caller-facing coordinator configuration, plus the gateway's settings loaded
//! from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::cache::{EvictionKind, EvictionPolicy, DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_SIZE};
use crate::error::ConfigError;
use crate::pipeline::KeyFn;
use crate::resilience::{
    BreakerSetting, CircuitBreakerConfig, DEFAULT_RESET_TIMEOUT, DEFAULT_THRESHOLD,
};

/// Lifetime of an entry when neither caller nor origin says otherwise
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Freshness window when neither caller nor origin says otherwise
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);

/// Caller-supplied signal that background work should be skipped.
pub type NetworkPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

// == Coordinator Config ==
/// Everything a [`ResourceCoordinator`](crate::ResourceCoordinator) can be
/// tuned with. All fields have defaults.
#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Used as the breaker's log component
    pub name: String,
    pub ttl: Duration,
    pub stale_time: Duration,
    pub eviction: EvictionPolicy,
    /// Methods whose responses may be cached
    pub allowed_methods: Vec<Method>,
    /// Methods whose concurrent requests are coalesced
    pub dedupe_allowed_methods: Vec<Method>,
    pub circuit_breaker: BreakerSetting,
    pub cache_key: Option<KeyFn>,
    /// Prefetch is declined while this returns true
    pub network_constrained: Option<NetworkPredicate>,
}

impl CoordinatorConfig {
    pub fn is_network_constrained(&self) -> bool {
        self.network_constrained
            .as_ref()
            .is_some_and(|constrained| constrained())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "resource".to_string(),
            ttl: DEFAULT_TTL,
            stale_time: DEFAULT_STALE_TIME,
            eviction: EvictionPolicy::default(),
            allowed_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
            dedupe_allowed_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
            circuit_breaker: BreakerSetting::default(),
            cache_key: None,
            network_constrained: None,
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("stale_time", &self.stale_time)
            .field("eviction", &self.eviction)
            .field("allowed_methods", &self.allowed_methods)
            .field("dedupe_allowed_methods", &self.dedupe_allowed_methods)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("cache_key", &self.cache_key.is_some())
            .field("network_constrained", &self.network_constrained.is_some())
            .finish()
    }
}

// == Gateway Config ==
/// Gateway server configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Origin that `/resource/*path` is proxied to
    pub upstream_url: String,
    /// HTTP server port
    pub server_port: u16,
    /// Size bound checked by the eviction sweep
    pub max_entries: usize,
    pub default_ttl: Duration,
    pub default_stale_time: Duration,
    pub eviction_kind: EvictionKind,
    /// Eviction sweep interval
    pub cleanup_interval: Duration,
    /// Zero disables the breaker
    pub breaker_threshold: u32,
    pub breaker_reset_timeout: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `UPSTREAM_URL` - Origin base URL (default: http://localhost:8080)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `MAX_ENTRIES` - Eviction size bound (default: 1000)
    /// - `DEFAULT_TTL_MS` - Default TTL (default: 300000)
    /// - `DEFAULT_STALE_TIME_MS` - Default stale time (default: 30000)
    /// - `EVICTION_POLICY` - `lru` or `oldest` (default: lru)
    /// - `CLEANUP_INTERVAL_MS` - Eviction sweep frequency (default: 60000)
    /// - `BREAKER_THRESHOLD` - Failures before blocking, 0 disables (default: 5)
    /// - `BREAKER_RESET_TIMEOUT_MS` - Delay before a trial request (default: 30000)
    ///
    /// Unset variables fall back to their default; set but unparsable ones
    /// are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            server_port: env_or("SERVER_PORT", defaults.server_port)?,
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries)?,
            default_ttl: env_millis_or("DEFAULT_TTL_MS", defaults.default_ttl)?,
            default_stale_time: env_millis_or("DEFAULT_STALE_TIME_MS", defaults.default_stale_time)?,
            eviction_kind: match env::var("EVICTION_POLICY") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.eviction_kind,
            },
            cleanup_interval: env_millis_or("CLEANUP_INTERVAL_MS", defaults.cleanup_interval)?,
            breaker_threshold: env_or("BREAKER_THRESHOLD", defaults.breaker_threshold)?,
            breaker_reset_timeout: env_millis_or(
                "BREAKER_RESET_TIMEOUT_MS",
                defaults.breaker_reset_timeout,
            )?,
        })
    }

    /// Validated coordinator settings for these values.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, ConfigError> {
        let circuit_breaker = match self.breaker_threshold {
            0 => BreakerSetting::Disabled,
            threshold => BreakerSetting::Enabled(CircuitBreakerConfig::new(
                threshold,
                self.breaker_reset_timeout,
            )),
        };

        Ok(CoordinatorConfig {
            name: "upstream".to_string(),
            ttl: self.default_ttl,
            stale_time: self.default_stale_time,
            eviction: EvictionPolicy::new(self.eviction_kind, self.max_entries, self.cleanup_interval)?,
            circuit_breaker,
            ..CoordinatorConfig::default()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_url: "http://localhost:8080".to_string(),
            server_port: 3000,
            max_entries: DEFAULT_MAX_SIZE,
            default_ttl: DEFAULT_TTL,
            default_stale_time: DEFAULT_STALE_TIME,
            eviction_kind: EvictionKind::Lru,
            cleanup_interval: DEFAULT_CHECK_INTERVAL,
            breaker_threshold: DEFAULT_THRESHOLD,
            breaker_reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn env_millis_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_or(name, default_ms).map(Duration::from_millis)
}
