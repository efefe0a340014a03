//! Request and Response models for the gateway API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{PrefetchRequest, MAX_PREFETCH_PATHS};
pub use responses::{
    BreakerResponse, ErrorResponse, HealthResponse, InvalidateResponse, PrefetchResponse,
    PrefetchResult, StatsResponse,
};
