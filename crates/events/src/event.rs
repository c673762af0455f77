//! The event envelope published on a job's topic.

use serde::{Deserialize, Serialize};
use subconscious_core::job_events::{EVENT_TYPE_FRAGMENT, EVENT_TYPE_PROGRESS, EVENT_TYPE_STATUS};
use subconscious_core::status::JobStatus;
use subconscious_core::types::{JobId, Sequence, Timestamp};
use subconscious_db::models::job::{Job, JobError, JobProgress, JobUpdate};

/// What changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    StatusChanged {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<JobProgress>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },
    ProgressUpdated {
        progress: JobProgress,
    },
    ResultFragmentAppended {
        /// Position of the fragment in the job's result list.
        index: usize,
        fragment: serde_json::Value,
    },
}

/// A committed change to one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    /// Monotonic per job, starting at 1. Equal to the record's `sequence`
    /// right after the change was applied.
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl JobEvent {
    /// Describe `update` as it was applied to produce `job`.
    ///
    /// `job` must be the record returned by the store for that very update,
    /// so the event carries the store-assigned sequence.
    pub fn from_committed(job: &Job, update: &JobUpdate) -> Self {
        let payload = match update {
            JobUpdate::Status { .. } => EventPayload::StatusChanged {
                status: job.status,
                progress: job.progress.clone(),
                error: job.error.clone().filter(|_| job.status == JobStatus::Failed),
            },
            JobUpdate::Progress(_) => EventPayload::ProgressUpdated {
                progress: job.progress.clone().unwrap_or_default(),
            },
            JobUpdate::AppendFragment(fragment) => EventPayload::ResultFragmentAppended {
                index: job.result.len().saturating_sub(1),
                fragment: fragment.clone(),
            },
        };

        Self {
            job_id: job.id,
            sequence: job.sequence,
            timestamp: job.updated_at,
            payload,
        }
    }

    /// Stream wire type (`status`, `progress` or `fragment`).
    pub fn wire_type(&self) -> &'static str {
        match self.payload {
            EventPayload::StatusChanged { .. } => EVENT_TYPE_STATUS,
            EventPayload::ProgressUpdated { .. } => EVENT_TYPE_PROGRESS,
            EventPayload::ResultFragmentAppended { .. } => EVENT_TYPE_FRAGMENT,
        }
    }

    /// The new status, if this is a status change.
    pub fn status(&self) -> Option<JobStatus> {
        match self.payload {
            EventPayload::StatusChanged { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Whether this event moves the job into `Complete` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }
}
