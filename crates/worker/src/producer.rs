//! The boundary between the worker pool and whatever produces results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use subconscious_core::error::CoreError;
use subconscious_core::job_events::{
    ERROR_CODE_INVALID_TRANSITION, ERROR_CODE_PRODUCER_FAILURE, ERROR_CODE_REJECTED_INPUT,
    ERROR_CODE_WARMUP_TIMEOUT,
};
use subconscious_core::types::JobId;
use subconscious_db::models::job::{JobError, JobProgress};
use subconscious_pipeline::JobController;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The producer refuses to work on this input.
    #[error("Input rejected: {0}")]
    Rejected(String),

    #[error("Warm-up did not finish within {0:?}")]
    WarmupTimeout(Duration),

    #[error("{0}")]
    Failed(String),

    /// The worker was asked to stop before the job finished.
    #[error("Worker shut down before the job finished")]
    Cancelled,

    /// The controller refused a report.
    #[error(transparent)]
    Controller(#[from] CoreError),
}

impl ProducerError {
    /// Error code recorded on the failed job.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => ERROR_CODE_REJECTED_INPUT,
            Self::WarmupTimeout(_) => ERROR_CODE_WARMUP_TIMEOUT,
            Self::Controller(CoreError::InvalidTransition { .. }) => ERROR_CODE_INVALID_TRANSITION,
            Self::Failed(_) | Self::Cancelled | Self::Controller(_) => ERROR_CODE_PRODUCER_FAILURE,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.code(), self.to_string())
    }
}

/// What a producer gets for one job: its input, a way to report back and
/// a token that fires on shutdown.
///
/// Reports go through the controller, so an illegal report fails the job
/// and surfaces here as [`ProducerError::Controller`].
pub struct JobContext {
    pub job_id: JobId,
    pub prompt: String,
    pub worker_id: String,
    pub cancel: CancellationToken,
    controller: Arc<JobController>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        prompt: impl Into<String>,
        worker_id: impl Into<String>,
        controller: Arc<JobController>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            prompt: prompt.into(),
            worker_id: worker_id.into(),
            cancel,
            controller,
        }
    }

    pub async fn report_progress(&self, progress: JobProgress) -> Result<(), ProducerError> {
        self.controller
            .update_progress(self.job_id, progress)
            .await?;
        Ok(())
    }

    /// Warm-up is over; fragments may follow.
    pub async fn start_running(&self) -> Result<(), ProducerError> {
        self.controller.start_running(self.job_id).await?;
        Ok(())
    }

    pub async fn emit(&self, fragment: serde_json::Value) -> Result<(), ProducerError> {
        self.controller
            .append_fragment(self.job_id, fragment)
            .await?;
        Ok(())
    }

    /// Sleep for `duration` unless the worker is shutting down first.
    pub async fn pause(&self, duration: Duration) -> Result<(), ProducerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProducerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Produces the result of a job that is already in `Warming`.
///
/// Returning `Ok` completes the job; returning an error fails it with
/// [`ProducerError::code`]. Producers never complete or fail a job
/// themselves.
#[async_trait]
pub trait JobProducer: Send + Sync {
    fn name(&self) -> &str;

    async fn produce(&self, ctx: &JobContext) -> Result<(), ProducerError>;
}
