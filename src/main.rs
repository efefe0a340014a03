//! Resource Gateway - caching HTTP gateway in front of a single upstream
//!
//! Serves upstream resources through the resource coordinator: cached with
//! stale-while-revalidate, guarded by a circuit breaker, deduplicated.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resource_cache::api::create_router;
use resource_cache::{AppState, Config, ResourceCoordinator};

/// Main entry point for the resource gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the coordinator (cache store, eviction sweep, breaker)
/// 4. Create Axum router with all endpoints
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM, disposing the coordinator
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resource Gateway");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        upstream = %config.upstream_url,
        max_entries = config.max_entries,
        eviction = %config.eviction_kind,
        default_ttl_ms = config.default_ttl.as_millis() as u64,
        default_stale_time_ms = config.default_stale_time.as_millis() as u64,
        breaker_threshold = config.breaker_threshold,
        port = config.server_port,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).context("Failed to build coordinator")?;
    let coordinator = state.coordinator.clone();

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the
/// coordinator's background tasks.
async fn shutdown_signal(coordinator: ResourceCoordinator) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    coordinator.dispose();
}
