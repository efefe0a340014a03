//! API Routes
//!
//! Configures the Axum router with all gateway endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    breaker_handler, health_handler, invalidate_handler, prefetch_handler, resource_handler,
    retry_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /resource/*path` - Fetch an upstream path through the cache
/// - `DELETE /cache/*path` - Invalidate the cached entry for a path
/// - `POST /prefetch` - Warm the cache for a list of paths
/// - `GET /breaker` - Circuit breaker status
/// - `POST /breaker/retry` - Manual trial request
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router with all endpoints
    Router::new()
        .route("/resource/*path", get(resource_handler))
        .route("/cache/*path", delete(invalidate_handler))
        .route("/prefetch", post(prefetch_handler))
        .route("/breaker", get(breaker_handler))
        .route("/breaker/retry", post(retry_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::ResourceCoordinator;
    use crate::pipeline::mock::ScriptedTransport;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = ResourceCoordinator::new(CoordinatorConfig::default(), transport).unwrap();
        create_router(AppState::new(coordinator))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/resource/users/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_invalidate_absent_key() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
