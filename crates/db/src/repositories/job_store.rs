use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use subconscious_core::error::CoreError;
use subconscious_core::pagination::{clamp_limit, clamp_offset};
use subconscious_core::types::{new_job_id, JobId};
use subconscious_core::validation::JobInput;
use tokio::sync::RwLock;

use crate::models::job::{Job, JobListQuery, JobProgress, JobSummary, JobUpdate};

/// Authoritative record of every job.
///
/// Only the lifecycle controller calls [`apply`](JobStore::apply); every
/// other caller is a reader. Implementations must make `apply` atomic with
/// respect to `get`/`list`: a reader never observes a half-applied update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `Queued` job and return the stored record.
    async fn create(
        &self,
        input: JobInput,
        progress: Option<JobProgress>,
    ) -> Result<Job, CoreError>;

    /// Fetch a consistent snapshot of one job.
    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError>;

    /// Summaries ordered newest first.
    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError>;

    /// Validate and apply one update, returning the record after the change.
    async fn apply(&self, id: JobId, update: &JobUpdate) -> Result<Job, CoreError>;

    /// Number of jobs held.
    async fn count(&self) -> Result<usize, CoreError>;

    /// Liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// In-process [`JobStore`].
///
/// The outer map lock is taken for writing only when a job is created;
/// each record has its own lock, so updates to different jobs never
/// contend with each other.
pub struct MemoryJobStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, Arc<RwLock<Job>>>,
    /// Job ids in creation order.
    order: Vec<JobId>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    async fn record(&self, id: JobId) -> Option<Arc<RwLock<Job>>> {
        self.inner.read().await.jobs.get(&id).cloned()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        input: JobInput,
        progress: Option<JobProgress>,
    ) -> Result<Job, CoreError> {
        let mut inner = self.inner.write().await;
        // Timestamp under the write lock so creation order and
        // `created_at` order agree.
        let job = Job::new(new_job_id(), input, progress, Utc::now());
        inner
            .jobs
            .insert(job.id, Arc::new(RwLock::new(job.clone())));
        inner.order.push(job.id);
        tracing::debug!(job_id = %job.id, "Job record created");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        match self.record(id).await {
            Some(record) => Ok(Some(record.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        let limit = clamp_limit(query.limit);
        let offset = clamp_offset(query.offset);

        let records: Vec<Arc<RwLock<Job>>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .filter_map(|id| inner.jobs.get(id).cloned())
                .collect()
        };

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            summaries.push(JobSummary::from(&*record.read().await));
        }
        Ok(summaries)
    }

    async fn apply(&self, id: JobId, update: &JobUpdate) -> Result<Job, CoreError> {
        let record = self
            .record(id)
            .await
            .ok_or_else(|| CoreError::job_not_found(id))?;

        let mut job = record.write().await;
        job.apply(update, Utc::now())?;
        Ok(job.clone())
    }

    async fn count(&self) -> Result<usize, CoreError> {
        Ok(self.inner.read().await.jobs.len())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
