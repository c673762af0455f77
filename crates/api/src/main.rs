use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subconscious_api::background;
use subconscious_api::config::ServerConfig;
use subconscious_api::router::build_app_router;
use subconscious_api::state::AppState;
use subconscious_db::queue::WorkQueue;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str =
    "subconscious_api=debug,subconscious_pipeline=debug,subconscious_worker=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    init_tracing(config.log_json);
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    // --- Components ---
    let state = AppState::new(config.clone());
    let controller = Arc::clone(&state.controller);

    let cancel = CancellationToken::new();
    let handles = background::spawn_all(&state, &cancel);
    tracing::info!(
        workers = config.worker_count,
        "Worker pool and background tasks started"
    );

    let app = build_app_router(state, &config);

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    // Open streams only end once the bus is shut down, so that happens as
    // soon as the signal arrives rather than after the server drains.
    let shutdown = {
        let cancel = cancel.clone();
        let controller = Arc::clone(&controller);
        async move {
            shutdown_signal().await;
            tracing::info!("Stopping workers and closing streams");
            cancel.cancel();
            controller.queue().close();
            controller.bus().shutdown().await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Server stopped accepting connections, cleaning up");

    let drain = futures::future::join_all(handles);
    match tokio::time::timeout(shutdown_timeout, drain).await {
        Ok(_) => tracing::info!("Workers and background tasks stopped"),
        Err(_) => tracing::warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Timed out waiting for background tasks"
        ),
    }

    tracing::info!(
        dropped_publishes = controller.bus().dropped_publishes(),
        "Shutdown complete"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
