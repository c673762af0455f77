//! Handlers for the `/jobs` resource.
//!
//! Submission only enqueues; workers pick jobs up in the background and
//! clients follow progress through the stream endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use subconscious_core::validation::JobInput;

use crate::error::AppResult;
use crate::handlers::parse_job_id;
use crate::query::PaginationParams;
use crate::response::{DataResponse, SubmittedJob};
use crate::state::AppState;

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub prompt: String,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and enqueue a job. Returns 202 with the new job id as soon as
/// the job is recorded; it has not started yet.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let job_id = state.controller.submit(JobInput::new(body.prompt)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedJob { job_id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first, paginated with `?limit=&offset=`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.controller.list(&params.into()).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&id)?;
    let job = state.controller.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}
