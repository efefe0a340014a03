//! Circuit breaker configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::{Breaker, CircuitBreaker, NoopBreaker};

/// Failures tolerated before the breaker starts blocking
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Delay before an automatic trial request is let through
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::InvalidThreshold);
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

// == Breaker Setting ==
/// How a coordinator obtains its breaker.
#[derive(Clone)]
pub enum BreakerSetting {
    /// Private breaker built from this config
    Enabled(CircuitBreakerConfig),
    /// Pass-through: never blocks
    Disabled,
    /// Breaker shared by reference with other coordinators
    Shared(Arc<dyn Breaker>),
}

impl BreakerSetting {
    pub fn build(&self, name: &str) -> Result<Arc<dyn Breaker>, ConfigError> {
        match self {
            BreakerSetting::Enabled(config) => {
                Ok(Arc::new(CircuitBreaker::new(name.to_string(), *config)?))
            }
            BreakerSetting::Disabled => Ok(Arc::new(NoopBreaker)),
            BreakerSetting::Shared(breaker) => Ok(Arc::clone(breaker)),
        }
    }
}

impl Default for BreakerSetting {
    fn default() -> Self {
        BreakerSetting::Enabled(CircuitBreakerConfig::default())
    }
}

impl fmt::Debug for BreakerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerSetting::Enabled(config) => f.debug_tuple("Enabled").field(config).finish(),
            BreakerSetting::Disabled => f.write_str("Disabled"),
            BreakerSetting::Shared(breaker) => f
                .debug_tuple("Shared")
                .field(&breaker.status())
                .finish(),
        }
    }
}
