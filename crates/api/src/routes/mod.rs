pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                            list, submit
/// /jobs/{id}                                       status snapshot
/// /jobs/{id}/stream                                server-sent events
/// /jobs/{id}/ws                                    WebSocket
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
