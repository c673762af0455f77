//! Fixed-size pool of worker loops.

use std::sync::Arc;
use std::time::Duration;

use subconscious_core::error::CoreError;
use subconscious_pipeline::{ClaimedJob, JobController};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::producer::{JobContext, JobProducer, ProducerError};

/// Pause after an unexpected claim error before trying again.
const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs `size` workers, each claiming one job at a time.
pub struct WorkerPool {
    controller: Arc<JobController>,
    producer: Arc<dyn JobProducer>,
    size: usize,
}

impl WorkerPool {
    pub fn new(controller: Arc<JobController>, producer: Arc<dyn JobProducer>, size: usize) -> Self {
        Self {
            controller,
            producer,
            size: size.max(1),
        }
    }

    /// Spawn every worker. Each stops when `cancel` fires or the queue
    /// closes.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!(
            workers = self.size,
            producer = self.producer.name(),
            "Starting worker pool",
        );
        (0..self.size)
            .map(|n| {
                let worker = Worker {
                    id: format!("worker-{n}"),
                    controller: Arc::clone(&self.controller),
                    producer: Arc::clone(&self.producer),
                };
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect()
    }
}

struct Worker {
    id: String,
    controller: Arc<JobController>,
    producer: Arc<dyn JobProducer>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.id, "Worker started");

        loop {
            let claimed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.controller.claim(&self.id) => result,
            };

            match claimed {
                Ok(job) => self.process(job, &cancel).await,
                Err(CoreError::QueueUnavailable(_)) => {
                    tracing::info!(worker_id = %self.id, "Queue closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Claim failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CLAIM_RETRY_DELAY) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Run the producer on one claimed job and record how it ended.
    async fn process(&self, claimed: ClaimedJob, cancel: &CancellationToken) {
        let job_id = claimed.job.id;
        let ctx = JobContext::new(
            job_id,
            claimed.job.input.prompt.clone(),
            self.id.clone(),
            Arc::clone(&self.controller),
            cancel.child_token(),
        );

        // A separate task so a panicking producer fails only its own job.
        let producer = Arc::clone(&self.producer);
        let outcome = match tokio::spawn(async move { producer.produce(&ctx).await }).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(ProducerError::Failed(format!(
                "producer task aborted: {join_err}"
            ))),
        };

        match outcome {
            Ok(()) => match self.controller.complete(job_id).await {
                Ok(_) => tracing::info!(job_id = %job_id, worker_id = %self.id, "Job completed"),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, worker_id = %self.id, error = %e, "Failed to complete job")
                }
            },
            // The controller already failed the job.
            Err(ProducerError::Controller(CoreError::InvalidTransition { .. })) => {
                tracing::warn!(job_id = %job_id, worker_id = %self.id, "Producer made an illegal update");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    worker_id = %self.id,
                    code = e.code(),
                    error = %e,
                    "Job failed",
                );
                if let Err(fail_err) = self.controller.fail(job_id, e.to_job_error()).await {
                    tracing::warn!(job_id = %job_id, error = %fail_err, "Failed to record job failure");
                }
            }
        }
    }
}
