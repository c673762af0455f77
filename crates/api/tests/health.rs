//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{body_json, get};
use subconscious_db::queue::WorkQueue;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let app = common::build_test_app();
    let response = get(app.router.clone(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["store_healthy"], true);
    assert_eq!(json["queue_healthy"], true);
    assert_eq!(json["bus_healthy"], true);
    assert_eq!(json["jobs"], 0);
    assert_eq!(json["queue_depth"], 0);
    assert_eq!(json["in_flight"], 0);
    assert_eq!(json["topics"], 0);
    assert_eq!(json["subscribers"], 0);
}

// ---------------------------------------------------------------------------
// Test: health counts reflect submitted jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_queue_depth_and_topics() {
    let app = common::build_test_app();
    common::submit(&app, "first").await;
    common::submit(&app, "second").await;

    let json = body_json(get(app.router.clone(), "/health").await).await;
    assert_eq!(json["jobs"], 2);
    assert_eq!(json["queue_depth"], 2);
    assert_eq!(json["topics"], 2);
}

// ---------------------------------------------------------------------------
// Test: a closed queue or shut-down bus reports degraded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_queue_reports_degraded() {
    let app = common::build_test_app();
    app.controller().queue().close();

    let json = body_json(get(app.router.clone(), "/health").await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["queue_healthy"], false);
    assert_eq!(json["bus_healthy"], true);
}

#[tokio::test]
async fn shut_down_bus_reports_degraded() {
    let app = common::build_test_app();
    app.controller().bus().shutdown().await;

    let json = body_json(get(app.router.clone(), "/health").await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["bus_healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = common::build_test_app();
    let response = get(app.router.clone(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = common::build_test_app();
    let response = get(app.router.clone(), "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");

    // MakeRequestUuid produces a hyphenated UUID.
    let id = request_id.to_str().unwrap();
    assert_eq!(id.len(), 36);
    assert!(id.parse::<uuid::Uuid>().is_ok());
}

// ---------------------------------------------------------------------------
// Test: an incoming x-request-id is echoed back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incoming_request_id_is_propagated() {
    let app = common::build_test_app();
    let response =
        common::get_with_header(app.router.clone(), "/health", "x-request-id", "trace-abc").await;

    assert_eq!(response.headers()["x-request-id"], "trace-abc");
}
