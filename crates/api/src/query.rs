//! Shared query parameter types for API handlers.

use serde::Deserialize;
use subconscious_db::models::job::JobListQuery;

/// Generic pagination parameters (`?limit=&offset=`).
///
/// Values are clamped in the store via `clamp_limit` / `clamp_offset`.
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<PaginationParams> for JobListQuery {
    fn from(params: PaginationParams) -> Self {
        Self {
            limit: params.limit,
            offset: params.offset,
        }
    }
}
