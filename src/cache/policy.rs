//! Eviction Policy Module
//!
//! Configuration for the periodic size-bounded eviction sweep.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default upper bound on stored entries
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default interval between eviction sweeps
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// == Eviction Kind ==
/// Ordering used to pick victims during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    /// Lowest use count goes first
    #[default]
    Lru,
    /// Earliest created goes first
    Oldest,
}

impl FromStr for EvictionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionKind::Lru),
            "oldest" => Ok(EvictionKind::Oldest),
            other => Err(ConfigError::UnknownEvictionKind(other.to_string())),
        }
    }
}

impl fmt::Display for EvictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionKind::Lru => f.write_str("lru"),
            EvictionKind::Oldest => f.write_str("oldest"),
        }
    }
}

// == Eviction Policy ==
/// Size bound and sweep cadence for a cache store.
///
/// The store may grow up to `max_size` entries; once a sweep finds it above
/// that bound it trims down to `max_size / 2` in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub kind: EvictionKind,
    pub max_size: usize,
    pub check_interval: Duration,
}

impl EvictionPolicy {
    /// Creates a validated policy.
    pub fn new(
        kind: EvictionKind,
        max_size: usize,
        check_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let policy = Self {
            kind,
            max_size,
            check_interval,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// LRU policy with the default sweep interval.
    pub fn lru(max_size: usize) -> Result<Self, ConfigError> {
        Self::new(EvictionKind::Lru, max_size, DEFAULT_CHECK_INTERVAL)
    }

    /// Oldest-first policy with the default sweep interval.
    pub fn oldest(max_size: usize) -> Result<Self, ConfigError> {
        Self::new(EvictionKind::Oldest, max_size, DEFAULT_CHECK_INTERVAL)
    }

    /// Rejects a zero size bound or a zero sweep interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidMaxSize(self.max_size));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidCheckInterval);
        }
        Ok(())
    }

    /// Number of entries kept after a trimming sweep.
    pub fn retain_count(&self) -> usize {
        self.max_size / 2
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            kind: EvictionKind::Lru,
            max_size: DEFAULT_MAX_SIZE,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}
