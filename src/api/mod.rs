//! API Module
//!
//! HTTP handlers and routing for the resource gateway.
//!
//! # Endpoints
//! - `GET /resource/*path` - Fetch an upstream resource through the cache
//! - `DELETE /cache/*path` - Invalidate a cached resource
//! - `POST /prefetch` - Warm the cache
//! - `GET /breaker`, `POST /breaker/retry` - Circuit breaker status and manual trial
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
