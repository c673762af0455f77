//! Job entity models, updates and DTOs.

use serde::{Deserialize, Serialize};
use subconscious_core::error::CoreError;
use subconscious_core::job_events::ERROR_CODE_PRODUCER_FAILURE;
use subconscious_core::status::JobStatus;
use subconscious_core::types::{JobId, Sequence, Timestamp};
use subconscious_core::validation::JobInput;

/// Optional progress snapshot attached to a non-terminal job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Estimated seconds until the job produces its final result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_seconds: Option<u32>,
    /// Free-form description of the current step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    pub fn estimate(seconds: u32) -> Self {
        Self {
            estimated_wait_seconds: Some(seconds),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A job record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub input: JobInput,
    pub status: JobStatus,
    pub progress: Option<JobProgress>,
    /// Result fragments in append order.
    pub result: Vec<serde_json::Value>,
    pub error: Option<JobError>,
    /// Sequence number of the last event describing this record.
    pub sequence: Sequence,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// A single mutation requested by the lifecycle controller.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Move to `to`. `progress` replaces the current snapshot (cleared on
    /// terminal states); `error` is recorded only when `to` is `Failed`.
    Status {
        to: JobStatus,
        progress: Option<JobProgress>,
        error: Option<JobError>,
    },
    Progress(JobProgress),
    AppendFragment(serde_json::Value),
}

impl JobUpdate {
    pub fn status(to: JobStatus) -> Self {
        Self::Status {
            to,
            progress: None,
            error: None,
        }
    }

    /// Short description used in transition errors and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Status { to, .. } => format!("status {to}"),
            Self::Progress(_) => "progress update".to_string(),
            Self::AppendFragment(_) => "result fragment".to_string(),
        }
    }
}

impl Job {
    /// Build a fresh `Queued` record.
    pub fn new(
        id: JobId,
        input: JobInput,
        progress: Option<JobProgress>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            input,
            status: JobStatus::Queued,
            progress,
            result: Vec::new(),
            error: None,
            sequence: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Check and apply `update`, advancing the sequence number.
    ///
    /// On error the record is left exactly as it was.
    pub fn apply(&mut self, update: &JobUpdate, now: Timestamp) -> Result<Sequence, CoreError> {
        let allowed = match update {
            JobUpdate::Status { to, .. } => self.status.can_transition_to(*to),
            JobUpdate::Progress(_) => self.status.accepts_progress(),
            JobUpdate::AppendFragment(_) => self.status.accepts_fragments(),
        };
        if !allowed {
            return Err(CoreError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                attempted: update.describe(),
            });
        }

        match update {
            JobUpdate::Status {
                to,
                progress,
                error,
            } => {
                self.status = *to;
                self.progress = if to.is_terminal() {
                    None
                } else {
                    progress.clone()
                };
                if *to == JobStatus::Failed {
                    self.error = Some(error.clone().unwrap_or_else(|| {
                        JobError::new(ERROR_CODE_PRODUCER_FAILURE, "job failed")
                    }));
                }
                if *to == JobStatus::Warming {
                    self.started_at = Some(now);
                }
                if to.is_terminal() {
                    self.completed_at = Some(now);
                }
            }
            JobUpdate::Progress(progress) => {
                self.progress = Some(progress.clone());
            }
            JobUpdate::AppendFragment(fragment) => {
                self.result.push(fragment.clone());
            }
        }

        self.sequence += 1;
        self.updated_at = now;
        Ok(self.sequence)
    }
}

/// List row returned by `GET /jobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub estimated_wait_seconds: Option<u32>,
    pub fragment_count: usize,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            prompt: job.input.prompt.clone(),
            status: job.status,
            estimated_wait_seconds: job
                .progress
                .as_ref()
                .and_then(|p| p.estimated_wait_seconds),
            fragment_count: job.result.len(),
            error: job.error.as_ref().map(|e| e.message.clone()),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
