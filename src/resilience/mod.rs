//! Resilience Module
//!
//! Circuit breaking for the origin behind the request pipeline.

mod circuit_breaker;
mod config;

pub use circuit_breaker::{
    Admission, Breaker, BreakerPermit, BreakerState, BreakerStatus, CircuitBreaker, NoopBreaker,
};
pub use config::{
    BreakerSetting, CircuitBreakerConfig, DEFAULT_RESET_TIMEOUT, DEFAULT_THRESHOLD,
};
