//! Integration tests for the WebSocket stream endpoint against a bound
//! server.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, tungstenite};

use common::run_job;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read JSON text frames until the server closes the socket.
async fn read_until_close(client: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(msg) = client.next().await {
            match msg.unwrap() {
                Message::Text(text) => frames.push(serde_json::from_str(&text).unwrap()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
    .await
    .expect("server should close the socket");
    frames
}

// ---------------------------------------------------------------------------
// Test: frames follow the job to completion, then the socket closes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_streams_job_until_terminal_close() {
    let app = common::build_test_app();
    let id = common::submit(&app, "x").await;
    let addr = common::spawn_server(app.router.clone()).await;

    let (mut client, _) = connect_async(format!("ws://{addr}/api/v1/jobs/{id}/ws"))
        .await
        .expect("upgrade should succeed");

    let state = app.state.clone();
    let driver = tokio::spawn(async move { run_job(&state.controller, 1).await });

    let frames = read_until_close(&mut client).await;
    driver.await.unwrap();

    let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        vec!["snapshot", "status", "progress", "status", "fragment", "status"]
    );
    let sequences: Vec<u64> = frames.iter().map(|f| f["sequence"].as_u64().unwrap()).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(frames.last().unwrap()["payload"]["status"], "complete");
}

// ---------------------------------------------------------------------------
// Test: two clients see the same sequence; one leaving does not affect the other
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_clients_are_independent() {
    let app = common::build_test_app();
    let id = common::submit(&app, "x").await;
    let addr = common::spawn_server(app.router.clone()).await;
    let url = format!("ws://{addr}/api/v1/jobs/{id}/ws");

    let (mut stays, _) = connect_async(url.as_str()).await.unwrap();
    let (leaves, _) = connect_async(url.as_str()).await.unwrap();
    drop(leaves);

    let state = app.state.clone();
    let driver = tokio::spawn(async move { run_job(&state.controller, 2).await });

    let frames = read_until_close(&mut stays).await;
    driver.await.unwrap();

    assert_eq!(frames.len(), 7);
    assert_eq!(frames.last().unwrap()["payload"]["status"], "complete");
}

// ---------------------------------------------------------------------------
// Test: finished job sends one snapshot frame then closes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_on_finished_job_sends_snapshot_and_closes() {
    let app = common::build_test_app();
    common::submit(&app, "x").await;
    let id = run_job(app.controller(), 1).await;
    let addr = common::spawn_server(app.router.clone()).await;

    let (mut client, _) = connect_async(format!("ws://{addr}/api/v1/jobs/{id}/ws"))
        .await
        .unwrap();
    let frames = read_until_close(&mut client).await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "snapshot");
    assert_eq!(frames[0]["payload"]["status"], "complete");
}

// ---------------------------------------------------------------------------
// Test: unknown job is refused before the upgrade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ws_unknown_job_is_refused_with_404() {
    let app = common::build_test_app();
    let addr = common::spawn_server(app.router.clone()).await;
    let id = uuid::Uuid::now_v7();

    let result = connect_async(format!("ws://{addr}/api/v1/jobs/{id}/ws")).await;

    assert_matches!(
        result,
        Err(tungstenite::Error::Http(response)) if response.status() == 404
    );
}
