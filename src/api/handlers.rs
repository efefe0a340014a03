//! API Handlers
//!
//! HTTP request handlers for each gateway endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::join_all;

use crate::config::Config;
use crate::coordinator::ResourceCoordinator;
use crate::error::{ConfigError, Result};
use crate::models::{
    BreakerResponse, ErrorResponse, HealthResponse, InvalidateResponse, PrefetchRequest,
    PrefetchResponse, PrefetchResult, StatsResponse,
};
use crate::pipeline::{CacheOptions, ResourceRequest, ResourceResponse};
use crate::transport::ReqwestTransport;

/// Reports how the gateway produced a response: HIT, STALE, MISS or REVALIDATED
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Connection-level headers not forwarded from the origin.
const HOP_BY_HOP: [HeaderName; 4] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: ResourceCoordinator,
    /// Options attached to every proxied GET
    pub cache_options: CacheOptions,
}

impl AppState {
    /// Creates a new AppState around an existing coordinator.
    pub fn new(coordinator: ResourceCoordinator) -> Self {
        Self {
            coordinator,
            cache_options: CacheOptions::new(),
        }
    }

    /// Creates a new AppState from configuration, proxying to
    /// `config.upstream_url` over reqwest.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(reqwest::Client::new())
            .with_base_url(config.upstream_url.clone());
        let coordinator =
            ResourceCoordinator::new(config.coordinator_config()?, Arc::new(transport))?;
        Ok(Self::new(coordinator))
    }

    /// Cacheable GET for an upstream path.
    pub fn resource_request(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> ResourceRequest {
        ResourceRequest::get(path)
            .params(params)
            .with_cache(self.cache_options)
    }
}

/// Converts a pipeline response into the gateway's HTTP response.
fn into_http_response(resource: ResourceResponse, was_stale: bool) -> Response {
    let x_cache = resource.source.as_header_value(was_stale);
    let mut response = (resource.status, resource.body).into_response();

    let headers = response.headers_mut();
    if resource.headers.contains_key(header::CONTENT_TYPE) {
        headers.remove(header::CONTENT_TYPE);
    }
    for (name, value) in resource.headers.iter() {
        if !HOP_BY_HOP.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(X_CACHE, HeaderValue::from_static(x_cache));
    response
}

/// Handler for GET /resource/*path
///
/// Fetches the upstream path through the coordinator. Query parameters are
/// forwarded and take part in the cache key.
pub async fn resource_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response> {
    let request = state.resource_request(&path, params);
    let key = state.coordinator.cache_key(&request);
    let was_stale = state
        .coordinator
        .store()
        .peek(&key)
        .is_some_and(|entry| entry.is_stale);

    let response = state.coordinator.fetch(request).await?;
    Ok(into_http_response(response, was_stale))
}

/// Handler for DELETE /cache/*path
///
/// Invalidates the entry the same path and query would be cached under.
/// Idempotent: absent keys are not an error.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<InvalidateResponse> {
    let key = state
        .coordinator
        .cache_key(&state.resource_request(&path, params));
    state.coordinator.invalidate(&key);

    Json(InvalidateResponse::new(key))
}

/// Handler for POST /prefetch
///
/// Warms every listed path concurrently. Individual failures are reported per
/// path, never as an error status.
pub async fn prefetch_handler(
    State(state): State<AppState>,
    Json(req): Json<PrefetchRequest>,
) -> Response {
    if let Some(error_msg) = req.validate() {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error_msg))).into_response();
    }

    let options = req.cache_options();
    let outcomes = join_all(req.paths.iter().map(|path| {
        let request = ResourceRequest::get(path.as_str()).with_cache(options);
        state.coordinator.prefetch(request)
    }))
    .await;

    let results = req
        .paths
        .into_iter()
        .zip(outcomes)
        .map(|(path, outcome)| PrefetchResult { path, outcome })
        .collect();
    Json(PrefetchResponse { results }).into_response()
}

/// Handler for GET /breaker
pub async fn breaker_handler(State(state): State<AppState>) -> Json<BreakerResponse> {
    Json(BreakerResponse::new(state.coordinator.breaker_status()))
}

/// Handler for POST /breaker/retry
///
/// Manual trial: lets the next request through a blocking breaker.
pub async fn retry_handler(State(state): State<AppState>) -> Json<BreakerResponse> {
    Json(BreakerResponse::new(state.coordinator.retry()))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let coordinator = &state.coordinator;
    Json(StatsResponse::new(
        &coordinator.stats(),
        coordinator.breaker_status(),
        coordinator.in_flight_count(),
    ))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_breaker(state.coordinator.breaker_status()))
}
