//! Response DTOs for the gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::coordinator::PrefetchOutcome;
use crate::resilience::BreakerStatus;

/// Response body for DELETE /cache/*path
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// The cache key that was invalidated
    pub key: String,
}

impl InvalidateResponse {
    /// Creates a new InvalidateResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' invalidated", key),
            key,
        }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    pub breaker: BreakerStatus,
    /// Requests currently shared through deduplication
    pub in_flight: usize,
}

impl StatsResponse {
    /// Creates a new StatsResponse from cache statistics
    pub fn new(stats: &CacheStats, breaker: BreakerStatus, in_flight: usize) -> Self {
        Self {
            hits: stats.hits,
            stale_hits: stats.stale_hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
            hit_rate: stats.hit_rate(),
            breaker,
            in_flight,
        }
    }
}

/// Response body for GET /breaker and POST /breaker/retry
#[derive(Debug, Clone, Serialize)]
pub struct BreakerResponse {
    pub status: BreakerStatus,
    pub accepting_requests: bool,
}

impl BreakerResponse {
    pub fn new(status: BreakerStatus) -> Self {
        Self {
            status,
            accepting_requests: status != BreakerStatus::Blocking,
        }
    }
}

/// One entry of a prefetch result
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResult {
    pub path: String,
    pub outcome: PrefetchOutcome,
}

/// Response body for POST /prefetch
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResponse {
    pub results: Vec<PrefetchResult>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the breaker blocks
    pub status: String,
    pub breaker: BreakerStatus,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn from_breaker(breaker: BreakerStatus) -> Self {
        let status = match breaker {
            BreakerStatus::Blocking => "degraded",
            BreakerStatus::Operational | BreakerStatus::Trial => "healthy",
        };
        Self {
            status: status.to_string(),
            breaker,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
