/// Jobs are identified by time-ordered UUIDv7 values.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Per-job event sequence number. `0` means nothing has been published yet.
pub type Sequence = u64;

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
