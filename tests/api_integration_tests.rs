//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each gateway endpoint against a
//! scripted upstream.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::HeaderValue;
use resource_cache::{api::create_router, AppState, CacheOptions, CoordinatorConfig, ResourceResponse};
use serde_json::Value;
use tower::ServiceExt;

use common::{breaker_config, coordinator, ScriptedTransport};

// == Helper Functions ==

fn create_test_app(config: CoordinatorConfig, transport: &Arc<ScriptedTransport>) -> Router {
    create_router(AppState::new(coordinator(config, transport)))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Body) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
}

fn x_cache(response: &axum::response::Response) -> &str {
    response.headers()["x-cache"].to_str().unwrap()
}

// == Resource Endpoint Tests ==

#[tokio::test]
async fn test_resource_miss_then_hit() {
    let transport = ScriptedTransport::new();
    transport.push_ok(
        ResourceResponse::ok(r#"{"name":"alice"}"#)
            .with_header(ETAG, HeaderValue::from_static("\"a1\"")),
    );
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let first = send(&app, "GET", "/resource/users/1", Body::empty()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(first.headers()[ETAG], "\"a1\"");
    let json = body_to_json(first.into_body()).await;
    assert_eq!(json["name"], "alice");

    let second = send(&app, "GET", "/resource/users/1", Body::empty()).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_resource_query_params_forwarded_and_keyed() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::ok("page 2"));
    transport.push_ok(ResourceResponse::ok("page 3"));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    send(&app, "GET", "/resource/users?page=2", Body::empty()).await;
    let other = send(&app, "GET", "/resource/users?page=3", Body::empty()).await;

    assert_eq!(body_to_string(other.into_body()).await, "page 3");
    let sent = transport.requests();
    assert_eq!(sent[0].params.get("page").map(String::as_str), Some("2"));
    assert_eq!(sent[1].params.get("page").map(String::as_str), Some("3"));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_resource_stale_entry_revalidated() {
    let transport = ScriptedTransport::new();
    transport.push_ok(
        ResourceResponse::ok("body")
            .with_header(ETAG, HeaderValue::from_static("\"v1\""))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("max-age=60, must-revalidate")),
    );
    transport.push_ok(ResourceResponse::new(StatusCode::NOT_MODIFIED));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    send(&app, "GET", "/resource/docs", Body::empty()).await;
    let response = send(&app, "GET", "/resource/docs", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "REVALIDATED");
    assert_eq!(body_to_string(response.into_body()).await, "body");
    assert_eq!(transport.requests()[1].headers[IF_NONE_MATCH], "\"v1\"");
}

#[tokio::test]
async fn test_resource_stale_entry_refetched() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::ok("v1"));
    transport.push_ok(ResourceResponse::ok("v2"));
    let mut state = AppState::new(coordinator(CoordinatorConfig::default(), &transport));
    state.cache_options = CacheOptions::new().stale_time(Duration::ZERO);
    let app = create_router(state);

    send(&app, "GET", "/resource/feed", Body::empty()).await;
    let response = send(&app, "GET", "/resource/feed", Body::empty()).await;

    assert_eq!(x_cache(&response), "STALE");
    assert_eq!(body_to_string(response.into_body()).await, "v2");
}

#[tokio::test]
async fn test_resource_upstream_not_found() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::new(StatusCode::NOT_FOUND));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let response = send(&app, "GET", "/resource/missing", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

// == Circuit Breaker Endpoint Tests ==

#[tokio::test]
async fn test_breaker_opens_after_upstream_failures() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::new(StatusCode::INTERNAL_SERVER_ERROR));
    transport.push_ok(ResourceResponse::new(StatusCode::INTERNAL_SERVER_ERROR));
    let app = create_test_app(breaker_config(2, Duration::from_secs(60)), &transport);

    for _ in 0..2 {
        let response = send(&app, "GET", "/resource/flaky", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let blocked = send(&app, "GET", "/resource/flaky", Body::empty()).await;
    assert_eq!(blocked.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.calls(), 2);

    let health = send(&app, "GET", "/health", Body::empty()).await;
    let json = body_to_json(health.into_body()).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["breaker"], "BLOCKING");
}

#[tokio::test]
async fn test_breaker_retry_endpoint() {
    let transport = ScriptedTransport::new();
    let app = create_test_app(breaker_config(1, Duration::from_secs(60)), &transport);

    send(&app, "GET", "/resource/down", Body::empty()).await;
    let status = send(&app, "GET", "/breaker", Body::empty()).await;
    assert_eq!(body_to_json(status.into_body()).await["status"], "BLOCKING");

    let retry = send(&app, "POST", "/breaker/retry", Body::empty()).await;
    assert_eq!(retry.status(), StatusCode::OK);
    let json = body_to_json(retry.into_body()).await;
    assert_eq!(json["status"], "TRIAL");
    assert_eq!(json["accepting_requests"], true);

    transport.push_ok(ResourceResponse::ok("up"));
    let response = send(&app, "GET", "/resource/down", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// == Invalidate Endpoint Tests ==

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::ok("v1"));
    transport.push_ok(ResourceResponse::ok("v2"));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    send(&app, "GET", "/resource/users/1", Body::empty()).await;

    let response = send(&app, "DELETE", "/cache/users/1", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "GET users/1");

    let refetched = send(&app, "GET", "/resource/users/1", Body::empty()).await;
    assert_eq!(x_cache(&refetched), "MISS");
    assert_eq!(body_to_string(refetched.into_body()).await, "v2");
}

// == Prefetch Endpoint Tests ==

#[tokio::test]
async fn test_prefetch_then_hit() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::ok("warm"));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let response = send(
        &app,
        "POST",
        "/prefetch",
        Body::from(r#"{"paths":["users/1"],"ttl_ms":60000}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["results"][0]["path"], "users/1");
    assert_eq!(json["results"][0]["outcome"], "completed");

    let cached = send(&app, "GET", "/resource/users/1", Body::empty()).await;
    assert_eq!(x_cache(&cached), "HIT");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_prefetch_reports_failures_per_path() {
    let transport = ScriptedTransport::new();
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let response = send(&app, "POST", "/prefetch", Body::from(r#"{"paths":["offline"]}"#)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["results"][0]["outcome"], "failed");
}

#[tokio::test]
async fn test_prefetch_declined_on_constrained_network() {
    let transport = ScriptedTransport::new();
    let config = CoordinatorConfig {
        network_constrained: Some(Arc::new(|| true)),
        ..CoordinatorConfig::default()
    };
    let app = create_test_app(config, &transport);

    let response = send(&app, "POST", "/prefetch", Body::from(r#"{"paths":["users/1"]}"#)).await;

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["results"][0]["outcome"], "network_constrained");
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_prefetch_empty_paths_rejected() {
    let transport = ScriptedTransport::new();
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let response = send(&app, "POST", "/prefetch", Body::from(r#"{"paths":[]}"#)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("path"));
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_after_operations() {
    let transport = ScriptedTransport::new();
    transport.push_ok(ResourceResponse::ok("v1"));
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    send(&app, "GET", "/resource/users/1", Body::empty()).await;
    send(&app, "GET", "/resource/users/1", Body::empty()).await;

    let response = send(&app, "GET", "/stats", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["total_entries"], 1);
    assert_eq!(json["breaker"], "OPERATIONAL");
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let transport = ScriptedTransport::new();
    let app = create_test_app(CoordinatorConfig::default(), &transport);

    let response = send(&app, "GET", "/health", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}
