//! Request Pipeline Module
//!
//! Request/response values, `Cache-Control` handling, the caching interceptor
//! and the transport seam the pipeline sends requests through.

mod cache_control;
mod interceptor;
mod request;

use async_trait::async_trait;

use crate::error::FetchError;

pub use cache_control::{CacheDirectives, Retention};
pub use interceptor::{CacheInterceptor, CacheLookup, InterceptorConfig, KeyFn};
pub use request::{CacheOptions, ResourceRequest, ResourceResponse, ResponseSource};

// == Transport ==
/// Issues a request to the origin.
///
/// Implementations return `Ok` for every response the origin produced,
/// whatever its status; `Err` is reserved for failures where no response
/// arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ResourceRequest) -> Result<ResourceResponse, FetchError>;
}
