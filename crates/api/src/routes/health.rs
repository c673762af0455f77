use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use subconscious_db::queue::WorkQueue;
use subconscious_db::repositories::JobStore;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store answers.
    pub store_healthy: bool,
    /// Whether the work queue accepts submissions.
    pub queue_healthy: bool,
    /// Whether the event bus accepts publications.
    pub bus_healthy: bool,
    /// Number of jobs held by the store.
    pub jobs: usize,
    /// Jobs waiting to be claimed.
    pub queue_depth: usize,
    /// Jobs claimed but not yet acknowledged.
    pub in_flight: usize,
    /// Event topics currently held by the bus.
    pub topics: usize,
    /// Attached stream subscribers across all topics.
    pub subscribers: usize,
}

/// GET /health -- returns service and component health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let controller = &state.controller;

    let store = controller.store();
    let store_healthy = store.ping().await.is_ok();
    let jobs = match store.count().await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "Health: job count failed");
            0
        }
    };

    let queue = controller.queue();
    let queue_healthy = !queue.is_closed();

    let bus = controller.bus();
    let bus_healthy = !bus.is_shut_down();
    let stats = bus.stats().await;

    let status = if store_healthy && queue_healthy && bus_healthy {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy,
        queue_healthy,
        bus_healthy,
        jobs,
        queue_depth: queue.depth().await,
        in_flight: queue.in_flight().await,
        topics: stats.topics,
        subscribers: stats.subscribers,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
