//! Job lifecycle controller.
//!
//! Every change to a job goes through [`JobController`]: the change is
//! checked and committed to the [`JobStore`] first and only then published
//! on the job's bus topic, so no subscriber can observe an event before the
//! store reflects it. Changes to one job are serialized by a per-job async
//! mutex held across the store write and the publish.

use std::collections::HashMap;
use std::sync::Arc;

use subconscious_core::error::CoreError;
use subconscious_core::job_events::{ERROR_CODE_INVALID_TRANSITION, ERROR_CODE_QUEUE_UNAVAILABLE};
use subconscious_core::status::JobStatus;
use subconscious_core::types::JobId;
use subconscious_core::validation::JobInput;
use subconscious_db::models::job::{Job, JobError, JobListQuery, JobProgress, JobSummary, JobUpdate};
use subconscious_db::queue::{ClaimId, QueueEntry, WorkQueue};
use subconscious_db::repositories::JobStore;
use subconscious_events::{EventBus, JobEvent};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Estimate stored on a freshly submitted job, in seconds.
pub const DEFAULT_INITIAL_ESTIMATE_SECS: u32 = 30;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub initial_estimate_secs: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_estimate_secs: DEFAULT_INITIAL_ESTIMATE_SECS,
        }
    }
}

/// A job a worker has claimed and moved to `Warming`.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub claim_id: ClaimId,
    pub worker_id: String,
    /// How many times the queue entry has been delivered.
    pub attempts: u32,
    /// The record right after the `Warming` transition.
    pub job: Job,
}

// ---------------------------------------------------------------------------
// Per-job locks
// ---------------------------------------------------------------------------

/// Lazily created async mutex per job.
#[derive(Default)]
struct JobLocks {
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl JobLocks {
    async fn acquire(&self, job_id: JobId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(job_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the lock for a finished job, unless someone is still using it.
    async fn release(&self, job_id: JobId) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(&job_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&job_id);
        }
    }

    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// JobController
// ---------------------------------------------------------------------------

/// Single writer for job records.
pub struct JobController {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<EventBus>,
    locks: JobLocks,
    config: ControllerConfig,
}

impl JobController {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        bus: Arc<EventBus>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            bus,
            locks: JobLocks::default(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Validate `input`, create a `Queued` job and hand it to the queue.
    ///
    /// Invalid input creates nothing. If the queue refuses the entry the job
    /// is failed with `queue_unavailable` and the caller gets
    /// [`CoreError::QueueUnavailable`].
    pub async fn submit(&self, input: JobInput) -> Result<JobId, CoreError> {
        input.check()?;

        let job = self
            .store
            .create(
                input,
                Some(JobProgress::estimate(self.config.initial_estimate_secs)),
            )
            .await?;
        if let Err(e) = self.bus.open(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to open job topic");
        }

        let entry = QueueEntry::new(job.id, job.input.prompt.clone());
        if let Err(e) = self.queue.enqueue(entry).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            let fail = JobUpdate::Status {
                to: JobStatus::Failed,
                progress: None,
                error: Some(JobError::new(ERROR_CODE_QUEUE_UNAVAILABLE, e.to_string())),
            };
            if let Err(fail_err) = self.apply(job.id, fail, false).await {
                tracing::error!(job_id = %job.id, error = %fail_err, "Failed to fail unqueued job");
            }
            return Err(e.into());
        }

        tracing::info!(job_id = %job.id, "Job submitted");
        Ok(job.id)
    }

    /// Wait for the next queued job, move it to `Warming` and acknowledge
    /// the queue entry.
    ///
    /// Entries whose job already left `Queued` (a redelivery after the job
    /// was started elsewhere) or no longer exists are acknowledged and
    /// skipped.
    pub async fn claim(&self, worker_id: &str) -> Result<ClaimedJob, CoreError> {
        loop {
            let claim = self.queue.claim(worker_id).await?;
            let job_id = claim.entry.job_id;
            let warming = JobUpdate::Status {
                to: JobStatus::Warming,
                progress: Some(JobProgress::estimate(self.config.initial_estimate_secs)),
                error: None,
            };

            match self.apply(job_id, warming, false).await {
                Ok(job) => {
                    self.ack(claim.id, job_id).await;
                    tracing::info!(
                        job_id = %job_id,
                        worker_id,
                        attempts = claim.entry.attempts,
                        "Job claimed by worker",
                    );
                    return Ok(ClaimedJob {
                        claim_id: claim.id,
                        worker_id: claim.worker_id,
                        attempts: claim.entry.attempts,
                        job,
                    });
                }
                Err(CoreError::InvalidTransition { from, .. }) => {
                    tracing::info!(
                        job_id = %job_id,
                        worker_id,
                        status = %from,
                        "Skipping duplicate delivery",
                    );
                    self.ack(claim.id, job_id).await;
                }
                Err(CoreError::NotFound { .. }) => {
                    tracing::warn!(job_id = %job_id, "Queue entry for unknown job, dropping");
                    self.ack(claim.id, job_id).await;
                }
                Err(e) => {
                    if let Err(release_err) = self.queue.release(claim.id).await {
                        tracing::warn!(job_id = %job_id, error = %release_err, "Failed to release claim");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn ack(&self, claim_id: ClaimId, job_id: JobId) {
        if let Err(e) = self.queue.ack(claim_id).await {
            tracing::warn!(job_id = %job_id, claim_id, error = %e, "Failed to acknowledge claim");
        }
    }

    /// Move a job to `to`.
    pub async fn transition(
        &self,
        job_id: JobId,
        to: JobStatus,
        progress: Option<JobProgress>,
        error: Option<JobError>,
    ) -> Result<Job, CoreError> {
        self.apply(job_id, JobUpdate::Status { to, progress, error }, true)
            .await
    }

    pub async fn start_running(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.transition(job_id, JobStatus::Running, None, None).await
    }

    pub async fn complete(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.transition(job_id, JobStatus::Complete, None, None).await
    }

    pub async fn fail(&self, job_id: JobId, error: JobError) -> Result<Job, CoreError> {
        self.transition(job_id, JobStatus::Failed, None, Some(error))
            .await
    }

    /// Replace the progress snapshot of a non-terminal job.
    pub async fn update_progress(
        &self,
        job_id: JobId,
        progress: JobProgress,
    ) -> Result<Job, CoreError> {
        self.apply(job_id, JobUpdate::Progress(progress), true).await
    }

    /// Append a result fragment to a `Running` job.
    pub async fn append_fragment(
        &self,
        job_id: JobId,
        fragment: serde_json::Value,
    ) -> Result<Job, CoreError> {
        self.apply(job_id, JobUpdate::AppendFragment(fragment), true)
            .await
    }

    pub async fn get(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))
    }

    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        self.store.list(query).await
    }

    /// Number of jobs with a live lock entry.
    pub async fn active_locks(&self) -> usize {
        self.locks.len().await
    }

    // -- internals ----------------------------------------------------------

    /// Apply one update under the job's lock.
    ///
    /// With `fail_on_reject`, an illegal update on a job that is still
    /// non-terminal forces the job to `Failed` (`invalid_transition`); the
    /// caller still receives the original `InvalidTransition`.
    async fn apply(
        &self,
        job_id: JobId,
        update: JobUpdate,
        fail_on_reject: bool,
    ) -> Result<Job, CoreError> {
        let guard = self.locks.acquire(job_id).await;
        let mut finished = false;

        let result = self.commit(job_id, &update).await;
        match &result {
            Ok(job) => finished = job.status.is_terminal(),
            Err(CoreError::InvalidTransition { from, attempted, .. }) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = %from,
                    attempted = %attempted,
                    "Rejected illegal job update",
                );
                finished = from.is_terminal();
                if fail_on_reject && !from.is_terminal() {
                    let fail = JobUpdate::Status {
                        to: JobStatus::Failed,
                        progress: None,
                        error: Some(JobError::new(
                            ERROR_CODE_INVALID_TRANSITION,
                            format!("cannot apply {attempted} while {from}"),
                        )),
                    };
                    match self.commit(job_id, &fail).await {
                        Ok(_) => finished = true,
                        Err(e) => {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to force job failure");
                        }
                    }
                }
            }
            // No record, so nothing will ever reach a terminal state.
            Err(CoreError::NotFound { .. }) => finished = true,
            Err(_) => {}
        }

        drop(guard);
        if finished {
            self.locks.release(job_id).await;
        }
        result
    }

    /// Store write, then publish. Must be called with the job's lock held.
    async fn commit(&self, job_id: JobId, update: &JobUpdate) -> Result<Job, CoreError> {
        let job = self.store.apply(job_id, update).await?;
        let event = JobEvent::from_committed(&job, update);
        let sequence = event.sequence;

        if let Err(e) = self.bus.publish(event).await {
            // The store is authoritative; streams resync from it.
            self.bus.record_dropped_publish();
            tracing::warn!(job_id = %job_id, sequence, error = %e, "Failed to publish job event");
        } else {
            tracing::debug!(job_id = %job_id, sequence, update = %update.describe(), "Job event published");
        }

        if job.status.is_terminal() {
            if let Err(e) = self.bus.close(job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to close job topic");
            }
            tracing::info!(job_id = %job_id, status = %job.status, "Job finished");
        }
        Ok(job)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
