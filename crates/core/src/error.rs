use crate::status::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Submission rejected; no job was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// The requested change is not an edge of the lifecycle graph, or the
    /// job is in a state that does not accept it.
    #[error("Invalid transition for job {job_id}: cannot apply {attempted} while {from}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        attempted: String,
    },

    /// The work queue refused the operation. Retryable.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The event bus refused the operation. Retryable.
    #[error("Event bus unavailable: {0}")]
    BusUnavailable(String),

    /// The producer working on a job reported an unrecoverable error.
    #[error("Producer failure: {0}")]
    ProducerFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing job.
    pub fn job_not_found(id: JobId) -> Self {
        Self::NotFound {
            entity: "Job",
            id: id.to_string(),
        }
    }

    /// Infrastructure failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_) | Self::BusUnavailable(_))
    }
}
