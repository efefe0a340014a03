//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use serde::Deserialize;

use crate::pipeline::CacheOptions;

/// Upper bound on paths accepted by one prefetch call
pub const MAX_PREFETCH_PATHS: usize = 64;

/// Request body for POST /prefetch
///
/// # Fields
/// - `paths`: Upstream paths to warm
/// - `ttl_ms`: Optional TTL override in milliseconds
/// - `stale_time_ms`: Optional stale time override in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchRequest {
    pub paths: Vec<String>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub stale_time_ms: Option<u64>,
}

impl PrefetchRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.paths.is_empty() {
            return Some("At least one path is required".to_string());
        }
        if self.paths.len() > MAX_PREFETCH_PATHS {
            return Some(format!(
                "Too many paths (maximum is {})",
                MAX_PREFETCH_PATHS
            ));
        }
        if self.paths.iter().any(|path| path.trim().is_empty()) {
            return Some("Paths cannot be empty".to_string());
        }
        None
    }

    /// Cache options carried by every prefetched request.
    pub fn cache_options(&self) -> CacheOptions {
        let mut options = CacheOptions::new();
        if let Some(ttl) = self.ttl_ms {
            options = options.ttl(Duration::from_millis(ttl));
        }
        if let Some(stale_time) = self.stale_time_ms {
            options = options.stale_time(Duration::from_millis(stale_time));
        }
        options
    }
}
