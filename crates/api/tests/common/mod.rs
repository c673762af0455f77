#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use subconscious_core::types::JobId;
use subconscious_db::models::job::JobProgress;
use subconscious_pipeline::JobController;
use subconscious_worker::SimulationConfig;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use subconscious_api::background;
use subconscious_api::config::ServerConfig;
use subconscious_api::router::build_app_router;
use subconscious_api::state::AppState;

/// Build a test `ServerConfig` from the documented defaults, with a
/// simulator that never sleeps.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::from_lookup(|_| None).expect("defaults are valid");
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.worker_count = 1;
    config.simulation = SimulationConfig::instant();
    config
}

/// The router plus handles on the components behind it.
///
/// Dropping it cancels any workers and background tasks it started.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    cancel: CancellationToken,
}

impl TestApp {
    pub fn controller(&self) -> &JobController {
        &self.state.controller
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the full application router with all middleware layers and no
/// workers, so tests drive job progress themselves.
///
/// This uses the same [`build_app_router`] as `main.rs`.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let state = AppState::new(config.clone());
    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        cancel: CancellationToken::new(),
    }
}

/// Like [`build_test_app`] but with the worker pool and background tasks
/// running, as in production.
pub fn build_test_app_with_workers() -> TestApp {
    let app = build_test_app();
    let _handles = background::spawn_all(&app.state, &app.cancel);
    app
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    addr
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_with_header(app: Router, uri: &str, name: &str, value: &str) -> Response<Body> {
    app.oneshot(
        Request::get(uri)
            .header(name, value)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Submit a prompt and return the new job id.
pub async fn submit(app: &TestApp, prompt: &str) -> JobId {
    let response = post_json(
        app.router.clone(),
        "/api/v1/jobs",
        serde_json::json!({ "prompt": prompt }),
    )
    .await;
    assert_eq!(response.status(), 202);
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().unwrap().parse().unwrap()
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(10), response.into_body().collect())
        .await
        .expect("body should finish")
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// One parsed server-sent event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub id: Option<u64>,
    pub data: Value,
}

/// Parse a complete `text/event-stream` body, skipping keep-alive comments.
pub fn parse_sse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut id = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("id:") {
                    id = v.trim().parse().ok();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            Some(SseEvent {
                event: event?,
                id,
                data: serde_json::from_str(&data).ok()?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Job driving
// ---------------------------------------------------------------------------

/// Take the next queued job through a full successful run, the way a
/// worker would: warming, one progress update, running, `fragments`
/// fragments, complete.
pub async fn run_job(controller: &JobController, fragments: usize) -> JobId {
    let claimed = controller.claim("test-worker").await.unwrap();
    let id = claimed.job.id;
    controller
        .update_progress(id, JobProgress::estimate(5))
        .await
        .unwrap();
    controller.start_running(id).await.unwrap();
    for n in 0..fragments {
        controller
            .append_fragment(id, serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }
    controller.complete(id).await.unwrap();
    id
}
