//! Server-sent events transport for job streams.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::StreamExt;
use subconscious_core::types::Sequence;
use subconscious_pipeline::StreamEvent;

use crate::error::AppResult;
use crate::handlers::parse_job_id;
use crate::state::AppState;

/// Header a reconnecting `EventSource` sends with the last id it saw.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// GET /api/v1/jobs/{id}/stream
///
/// Opens a `text/event-stream` for one job. The first event is a catch-up
/// `snapshot` unless `Last-Event-ID` names an event still in history, in
/// which case delivery resumes right after it. Each event's `id` is its
/// sequence number. The stream ends after the terminal status.
///
/// Unknown jobs get a 404 before any stream is opened.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    let resume_after = last_event_id(&headers);

    let stream = state.streamer.attach(job_id, resume_after).await?;
    tracing::info!(job_id = %job_id, resume_after = ?resume_after, "SSE client attached");

    let events = stream
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(state.config.sse_keepalive_secs)),
    ))
}

/// Parse `Last-Event-ID`. Anything unparsable is treated as absent.
fn last_event_id(headers: &HeaderMap) -> Option<Sequence> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn to_sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .id(event.sequence().to_string())
        .data(event.to_wire().to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn last_event_id_parses_sequence() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);

        headers.insert(LAST_EVENT_ID, HeaderValue::from_static(" 7 "));
        assert_eq!(last_event_id(&headers), Some(7));

        headers.insert(LAST_EVENT_ID, HeaderValue::from_static("abc"));
        assert_eq!(last_event_id(&headers), None);
    }
}
