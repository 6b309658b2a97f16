//! Orderly API Gateway
//!
//! Single entry point in front of the users and orders services.
//! Handles:
//! - Request correlation and access logging
//! - Rate limiting
//! - Token verification and identity propagation
//! - Prefix routing to the backends

mod app;
mod context;
mod handlers;
mod middleware;
mod routes;
mod shutdown;

use app::{create_router, AppState};
use middleware::rate_limit::SystemClock;
use shutdown::{serve_until_drained, Shutdown};
use orderly_common::{
    config::{AppConfig, DEVELOPMENT_JWT_SECRET},
    metrics,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        environment = %config.environment,
        "Starting Orderly API Gateway v{}",
        orderly_common::VERSION
    );

    if config.jwt_secret() == DEVELOPMENT_JWT_SECRET {
        tracing::warn!("JWT_SECRET not set, using the development secret");
    }

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }
    metrics::register_metrics();

    let state = AppState::new(config, Arc::new(SystemClock))?;
    let config = state.config.clone();

    // Drop counters whose window has closed
    let limiter = state.limiter.clone();
    let sweep_every = Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let evicted = limiter.sweep_expired();
            if evicted > 0 {
                tracing::debug!(evicted, remaining = limiter.tracked_keys(), "Swept rate limit counters");
            }
        }
    });

    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API Gateway running on port {}", config.server.port);
    info!("Users service: {}", config.upstreams.users_url);
    info!("Orders service: {}", config.upstreams.orders_url);
    info!(
        window_secs = config.rate_window().as_secs(),
        general_max = config.rate_limit.general_max,
        auth_max = config.rate_limit.auth_max,
        "Rate limiting enabled"
    );

    let (drain_tx, mut drain_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = drain_rx.wait_for(|stop| *stop).await;
    })
    .into_future();

    // Serve until a signal arrives, then give in-flight requests a grace period
    let outcome =
        serve_until_drained(server, shutdown_signal(), drain_tx, config.shutdown_timeout()).await?;
    if outcome == Shutdown::Clean {
        info!("Server shutdown complete");
    }

    Ok(outcome.into())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
