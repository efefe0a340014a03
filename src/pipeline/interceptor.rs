//! Response caching and conditional revalidation.
//!
//! The interceptor sits between the caller and the transport. A fresh entry
//! short-circuits the request; a stale one is served to subscribers while the
//! request goes out carrying `If-None-Match` / `If-Modified-Since`, and a 304
//! answer is replaced by the cached body before anyone sees it.

use std::fmt;
use std::sync::Arc;

use http::header::{
    CACHE_CONTROL, DATE, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::cache::{CacheBackend, EntrySnapshot};
use crate::config::{DEFAULT_STALE_TIME, DEFAULT_TTL};
use crate::error::FetchError;
use crate::pipeline::cache_control::{CacheDirectives, Retention};
use crate::pipeline::request::{ResourceRequest, ResourceResponse, ResponseSource};
use crate::pipeline::Transport;

/// Custom cache key derivation over the logical request.
pub type KeyFn = Arc<dyn Fn(&ResourceRequest) -> String + Send + Sync>;

/// Headers a 304 may carry that replace the stored ones.
const REVALIDATION_HEADERS: [http::header::HeaderName; 5] =
    [CACHE_CONTROL, DATE, ETAG, EXPIRES, LAST_MODIFIED];

// == Interceptor Config ==
#[derive(Clone)]
pub struct InterceptorConfig {
    /// Methods eligible for caching
    pub allowed_methods: Vec<Method>,
    /// Retention used where neither the request nor the response overrides it
    pub defaults: Retention,
    pub key_fn: Option<KeyFn>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            allowed_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
            defaults: Retention::new(DEFAULT_STALE_TIME, DEFAULT_TTL),
            key_fn: None,
        }
    }
}

impl fmt::Debug for InterceptorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorConfig")
            .field("allowed_methods", &self.allowed_methods)
            .field("defaults", &self.defaults)
            .field("key_fn", &self.key_fn.is_some())
            .finish()
    }
}

// == Cache Lookup ==
/// Outcome of consulting the cache before a request goes out.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Request is not cacheable
    Bypass,
    Miss {
        key: String,
    },
    Fresh {
        key: String,
        entry: EntrySnapshot<ResourceResponse>,
    },
    Stale {
        key: String,
        entry: EntrySnapshot<ResourceResponse>,
    },
}

impl CacheLookup {
    pub fn entry(&self) -> Option<&EntrySnapshot<ResourceResponse>> {
        match self {
            CacheLookup::Fresh { entry, .. } | CacheLookup::Stale { entry, .. } => Some(entry),
            _ => None,
        }
    }
}

// == Cache Interceptor ==
pub struct CacheInterceptor {
    backend: Arc<dyn CacheBackend<ResourceResponse>>,
    config: InterceptorConfig,
}

impl fmt::Debug for CacheInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInterceptor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheInterceptor {
    pub fn new(backend: Arc<dyn CacheBackend<ResourceResponse>>, config: InterceptorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend<ResourceResponse>> {
        &self.backend
    }

    /// Caller key, else the custom key function, else the request identity.
    pub fn cache_key(&self, request: &ResourceRequest) -> String {
        if let Some(key) = &request.cache_key {
            return key.clone();
        }
        match &self.config.key_fn {
            Some(key_fn) => key_fn(request),
            None => request.identity(),
        }
    }

    pub fn is_cacheable(&self, request: &ResourceRequest) -> bool {
        request.cache.is_some() && self.config.allowed_methods.contains(&request.method)
    }

    /// Request options layered over the configured defaults.
    pub fn retention_defaults(&self, request: &ResourceRequest) -> Retention {
        let options = request.cache.unwrap_or_default();
        Retention {
            stale_time: options.stale_time.unwrap_or(self.config.defaults.stale_time),
            ttl: options.ttl.unwrap_or(self.config.defaults.ttl),
        }
    }

    // == Lookup ==
    /// Reads the cache for `request`. A hit counts as a use of the entry.
    pub fn lookup(&self, request: &ResourceRequest) -> CacheLookup {
        if !self.is_cacheable(request) {
            return CacheLookup::Bypass;
        }

        let key = self.cache_key(request);
        match self.backend.get(&key) {
            None => CacheLookup::Miss { key },
            Some(entry) if entry.is_stale => CacheLookup::Stale { key, entry },
            Some(entry) => CacheLookup::Fresh { key, entry },
        }
    }

    /// Cached response for a lookup hit, tagged as served from cache.
    pub fn serve_cached(entry: &EntrySnapshot<ResourceResponse>) -> ResourceResponse {
        entry.value.clone().with_source(ResponseSource::Cache)
    }

    // == Prepare ==
    /// Attaches conditional-request headers when a stale entry backs the request.
    pub fn prepare(&self, mut request: ResourceRequest, lookup: &CacheLookup) -> ResourceRequest {
        if let CacheLookup::Stale { key, entry } = lookup {
            if let Some(etag) = entry.value.etag() {
                request.headers.insert(IF_NONE_MATCH, etag.clone());
            }
            if let Some(last_modified) = entry.value.last_modified() {
                request.headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
            }
            debug!(key = %key, "Revalidating stale cache entry");
        }
        request
    }

    // == Complete ==
    /// Applies the response to the cache and returns what the caller sees.
    ///
    /// A 304 against a cached entry yields the cached body (with refreshed
    /// validators) and re-stores it; a 2xx is stored unless `no-store` says
    /// otherwise. Anything else passes through untouched, including a 304
    /// with nothing cached to stand in for it (caller-supplied validators),
    /// which [`ResourceResponse::error_for_status`] rejects.
    pub fn complete(
        &self,
        request: &ResourceRequest,
        lookup: &CacheLookup,
        response: ResourceResponse,
    ) -> ResourceResponse {
        let (key, cached) = match lookup {
            CacheLookup::Bypass => return response.with_source(ResponseSource::Network),
            CacheLookup::Miss { key } => (key, None),
            CacheLookup::Fresh { key, entry } | CacheLookup::Stale { key, entry } => {
                (key, Some(entry))
            }
        };
        let defaults = self.retention_defaults(request);

        if response.status == StatusCode::NOT_MODIFIED {
            let Some(entry) = cached else {
                debug!(key = %key, "304 without a cached entry");
                return response.with_source(ResponseSource::Network);
            };
            let refreshed = merge_revalidated(entry.value.clone(), &response.headers);
            match CacheDirectives::from_headers(&refreshed.headers).resolve(defaults) {
                Some(retention) => self.backend.store(
                    key,
                    refreshed.clone(),
                    Some(retention.stale_time),
                    Some(retention.ttl),
                ),
                None => debug!(key = %key, "Revalidated response marked no-store"),
            }
            debug!(key = %key, "Origin confirmed cached entry (304)");
            return refreshed.with_source(ResponseSource::Revalidated);
        }

        let response = response.with_source(ResponseSource::Network);
        if response.status.is_success() {
            match CacheDirectives::from_headers(&response.headers).resolve(defaults) {
                Some(retention) => self.backend.store(
                    key,
                    response.clone(),
                    Some(retention.stale_time),
                    Some(retention.ttl),
                ),
                None => debug!(key = %key, "Response marked no-store, not caching"),
            }
        }
        response
    }

    // == Intercept ==
    /// Runs the full pipeline for one request against `transport`.
    pub async fn intercept(
        &self,
        request: ResourceRequest,
        transport: &dyn Transport,
    ) -> Result<ResourceResponse, FetchError> {
        let lookup = self.lookup(&request);
        if let CacheLookup::Fresh { entry, .. } = &lookup {
            return Ok(Self::serve_cached(entry));
        }

        let prepared = self.prepare(request.clone(), &lookup);
        let response = transport.send(prepared).await?;
        let response = self.complete(&request, &lookup, response);
        if response.status == StatusCode::NOT_MODIFIED {
            return response.error_for_status();
        }
        Ok(response)
    }
}

/// Overlays the validators and freshness headers of a 304 onto the stored
/// response.
fn merge_revalidated(mut cached: ResourceResponse, not_modified: &HeaderMap) -> ResourceResponse {
    for name in REVALIDATION_HEADERS {
        let values: Vec<_> = not_modified.get_all(&name).iter().cloned().collect();
        if values.is_empty() {
            continue;
        }
        cached.headers.remove(&name);
        for value in values {
            cached.headers.append(name.clone(), value);
        }
    }
    cached
}
