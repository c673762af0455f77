pub mod jobs;
pub mod stream;

use subconscious_core::types::JobId;

use crate::error::{AppError, AppResult};

/// Parse a job id path segment, rejecting anything that is not a UUID.
pub(crate) fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid job id")))
}
