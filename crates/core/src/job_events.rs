//! Wire names for job stream events and job error codes.
//!
//! Used by the stream multiplexer when framing events for SSE and
//! WebSocket clients, and by the lifecycle controller when failing jobs.

// ---------------------------------------------------------------------------
// Stream event types
// ---------------------------------------------------------------------------

/// Synthesized catch-up event describing the job as of attach time.
pub const EVENT_TYPE_SNAPSHOT: &str = "snapshot";

/// The job moved to a new lifecycle status.
pub const EVENT_TYPE_STATUS: &str = "status";

/// The job's progress snapshot (e.g. estimated wait) changed.
pub const EVENT_TYPE_PROGRESS: &str = "progress";

/// A result fragment was appended.
pub const EVENT_TYPE_FRAGMENT: &str = "fragment";

/// The stream itself failed (infrastructure error); the stream ends after it.
pub const EVENT_TYPE_ERROR: &str = "error";

// ---------------------------------------------------------------------------
// Job error codes (stored on failed jobs)
// ---------------------------------------------------------------------------

/// The producer reported an unrecoverable error.
pub const ERROR_CODE_PRODUCER_FAILURE: &str = "producer_failure";

/// The producer attempted an illegal transition; the job was forced to fail.
pub const ERROR_CODE_INVALID_TRANSITION: &str = "invalid_transition";

/// The job could not be handed to the work queue.
pub const ERROR_CODE_QUEUE_UNAVAILABLE: &str = "queue_unavailable";

/// The producer rejected the submitted input after it was queued.
pub const ERROR_CODE_REJECTED_INPUT: &str = "rejected_input";

/// Warm-up did not finish within the producer's time limit.
pub const ERROR_CODE_WARMUP_TIMEOUT: &str = "warmup_timeout";
