//! Uplink runner
//!
//! Single-binary Rust service that:
//! 1. Loads the ordered proxy list and the persisted session cache
//! 2. Runs one heartbeat worker per active proxy under the pool orchestrator
//! 3. Serves /health and /metrics for operations

mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use uplink_client::{ApiTransport, HttpApiClient, SessionStore, load_proxy_file};
use uplink_pool::Pool;

use crate::config::Config;

/// Covers the pool's internal worker drain plus scheduling slack.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<Pool>,
    prometheus: PrometheusHandle,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Load and validate the proxy list. An unreadable or empty list is fatal,
/// detected before any pool state exists.
fn load_proxies(path: &Path) -> Result<Vec<String>, error::Error> {
    let display = path.display().to_string();
    let proxies = load_proxy_file(path).map_err(|e| error::Error::ProxyList {
        path: display.clone(),
        reason: e.to_string(),
    })?;
    if proxies.is_empty() {
        return Err(error::Error::EmptyProxyList { path: display });
    }
    Ok(proxies)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting uplink-runner");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        proxy_file = %config.uplink.proxy_file.display(),
        session_file = %config.uplink.session_file.display(),
        max_concurrency = config.pool.max_concurrency,
        ping_interval_secs = config.pool.ping_interval_secs,
        listen_addr = %config.ops.listen_addr,
        "configuration loaded"
    );

    // An unreadable or empty proxy list is fatal before any worker spawns.
    let proxies = load_proxies(&config.uplink.proxy_file)?;
    info!(proxies = proxies.len(), "proxy list loaded");

    let sessions = Arc::new(
        SessionStore::load(config.uplink.session_file.clone())
            .await
            .context("failed to load session cache")?,
    );
    info!(cached_sessions = sessions.len().await, "session cache loaded");

    let token = config
        .uplink
        .token
        .take()
        .context("bearer token missing after config validation")?;
    let transport: Arc<dyn ApiTransport> =
        Arc::new(HttpApiClient::new(token, config.request_timeout()));

    let pool = Arc::new(Pool::new(proxies, transport, sessions, config.pool_config()));

    let app_state = AppState {
        pool: pool.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(config.ops.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.ops.listen_addr))?;
    info!(addr = %config.ops.listen_addr, "ops endpoints listening");

    let pool_handle = tokio::spawn(pool.clone().run());
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Wait for the OS signal, then cancel the pool and let it drain.
    shutdown_signal().await;
    pool.shutdown();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, pool_handle).await {
        Ok(Ok(())) => info!("all workers drained"),
        Ok(Err(e)) => error!(error = %e, "pool task panicked"),
        Err(_) => warn!(
            shutdown_timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "shutdown timeout exceeded, forcing exit"
        ),
    }

    server_handle.abort();
    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 while any worker is live, 503 once none are.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.pool.status().await;
    let status_code = if body["status"] == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
