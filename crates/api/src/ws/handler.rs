use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use subconscious_pipeline::JobStream;

use crate::error::AppResult;
use crate::handlers::parse_job_id;
use crate::state::AppState;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// GET /api/v1/jobs/{id}/ws
///
/// The job is looked up before the upgrade so an unknown id is answered
/// with a plain 404 instead of an open socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let job_id = parse_job_id(&id)?;
    let stream = state.streamer.attach(job_id, None).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, stream)))
}

/// Forward stream events to the socket until the job finishes or the
/// client goes away.
///
/// Splits the socket into a sink (outbound) and stream (inbound) so pings,
/// client close frames and job events are handled on one task.
async fn handle_socket(socket: WebSocket, stream: JobStream) {
    let job_id = stream.job_id();
    tracing::info!(job_id = %job_id, "WebSocket connected");

    let (mut sink, mut inbound) = socket.split();
    let mut events = Box::pin(stream.into_stream());

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    let _ = sink.send(close_frame("stream ended")).await;
                    break;
                };
                let text = event.to_wire().to_string();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(job_id = %job_id, "WebSocket sink closed");
                    break;
                }
                if event.is_final() {
                    let _ = sink.send(close_frame("job finished")).await;
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            msg = inbound.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(job_id = %job_id, "Pong received");
                }
                // Clients have nothing to say on this socket.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(job_id = %job_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::info!(job_id = %job_id, "WebSocket disconnected");
}

fn close_frame(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.into(),
    }))
}
