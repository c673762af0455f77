//! At-least-once work queue between submitters and workers.
//!
//! A worker [`claim`](WorkQueue::claim)s the oldest entry, which moves it
//! from the pending list into a lease. The entry is only gone for good once
//! the claim is [`ack`](WorkQueue::ack)ed. Leases that outlive the
//! visibility timeout are handled by [`reclaim_expired`](WorkQueue::reclaim_expired)
//! according to the configured [`ReclaimPolicy`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subconscious_core::error::CoreError;
use subconscious_core::types::{JobId, Timestamp};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Identifies one delivery of a queue entry to one worker.
pub type ClaimId = u64;

/// Default lease duration before an unacknowledged claim is reclaimed.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// What a worker needs to start on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub prompt: String,
    pub enqueued_at: Timestamp,
    /// Number of times this entry has been handed to a worker.
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(job_id: JobId, prompt: impl Into<String>) -> Self {
        Self {
            job_id,
            prompt: prompt.into(),
            enqueued_at: chrono::Utc::now(),
            attempts: 0,
        }
    }
}

/// A leased entry handed to a worker.
#[derive(Debug, Clone)]
pub struct Claim {
    pub id: ClaimId,
    pub worker_id: String,
    pub entry: QueueEntry,
}

/// What happens to a claim that was never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Put the entry back at the head of the queue (at-least-once).
    Redeliver,
    /// Drop the entry and log it (at-most-once).
    Discard,
}

impl std::str::FromStr for ReclaimPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redeliver" => Ok(Self::Redeliver),
            "discard" => Ok(Self::Discard),
            other => Err(format!("unknown reclaim policy '{other}'")),
        }
    }
}

/// Tunables for [`MemoryWorkQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    pub reclaim_policy: ReclaimPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            reclaim_policy: ReclaimPolicy::Redeliver,
        }
    }
}

/// Outcome of one reclaim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub redelivered: usize,
    pub discarded: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work queue is closed")]
    Closed,

    /// The claim was already acknowledged, released or reclaimed.
    #[error("Unknown or expired claim {0}")]
    UnknownClaim(ClaimId),
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Closed => CoreError::QueueUnavailable(err.to_string()),
            QueueError::UnknownClaim(_) => CoreError::Internal(err.to_string()),
        }
    }
}

/// Ordered handoff channel from submitters to workers.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append an entry at the tail.
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Wait for the oldest entry and lease it to `worker_id`.
    ///
    /// Waiting is cooperative; dropping the future cancels the wait without
    /// losing any entry.
    async fn claim(&self, worker_id: &str) -> Result<Claim, QueueError>;

    /// Confirm a claim; the entry is removed permanently.
    async fn ack(&self, claim: ClaimId) -> Result<(), QueueError>;

    /// Give a claimed entry back to the head of the queue.
    async fn release(&self, claim: ClaimId) -> Result<(), QueueError>;

    /// Apply the reclaim policy to every lease past its deadline.
    async fn reclaim_expired(&self) -> ReclaimReport;

    /// Entries waiting to be claimed.
    async fn depth(&self) -> usize;

    /// Entries claimed but not yet acknowledged.
    async fn in_flight(&self) -> usize;

    /// Refuse new entries and wake every waiting worker.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

struct Lease {
    entry: QueueEntry,
    worker_id: String,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    leases: HashMap<ClaimId, Lease>,
}

/// In-process [`WorkQueue`] backed by a `VecDeque` and a [`Notify`].
pub struct MemoryWorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    next_claim: AtomicU64,
    config: QueueConfig,
}

impl MemoryWorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            next_claim: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let job_id = entry.job_id;
        let depth = {
            let mut state = self.state.lock().await;
            state.pending.push_back(entry);
            state.pending.len()
        };
        self.notify.notify_one();
        tracing::debug!(job_id = %job_id, depth, "Job enqueued");
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Claim, QueueError> {
        loop {
            // Register interest before looking, so an enqueue between the
            // check and the await still wakes us.
            let notified = self.notify.notified();

            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            {
                let mut state = self.state.lock().await;
                if let Some(mut entry) = state.pending.pop_front() {
                    entry.attempts += 1;
                    let id = self.next_claim.fetch_add(1, Ordering::Relaxed);
                    state.leases.insert(
                        id,
                        Lease {
                            entry: entry.clone(),
                            worker_id: worker_id.to_string(),
                            deadline: Instant::now() + self.config.visibility_timeout,
                        },
                    );
                    return Ok(Claim {
                        id,
                        worker_id: worker_id.to_string(),
                        entry,
                    });
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, claim: ClaimId) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .leases
            .remove(&claim)
            .map(|_| ())
            .ok_or(QueueError::UnknownClaim(claim))
    }

    async fn release(&self, claim: ClaimId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let lease = state
                .leases
                .remove(&claim)
                .ok_or(QueueError::UnknownClaim(claim))?;
            state.pending.push_front(lease.entry);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn reclaim_expired(&self) -> ReclaimReport {
        let now = Instant::now();
        let mut report = ReclaimReport::default();
        let mut state = self.state.lock().await;

        let mut expired: Vec<ClaimId> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        // Oldest claims go back first so FIFO order is preserved at the head.
        expired.sort_unstable_by(|a, b| b.cmp(a));

        for id in expired {
            let Some(lease) = state.leases.remove(&id) else {
                continue;
            };
            match self.config.reclaim_policy {
                ReclaimPolicy::Redeliver => {
                    tracing::warn!(
                        job_id = %lease.entry.job_id,
                        worker_id = %lease.worker_id,
                        attempts = lease.entry.attempts,
                        "Claim expired, redelivering",
                    );
                    state.pending.push_front(lease.entry);
                    report.redelivered += 1;
                }
                ReclaimPolicy::Discard => {
                    tracing::warn!(
                        job_id = %lease.entry.job_id,
                        worker_id = %lease.worker_id,
                        "Claim expired, discarding entry",
                    );
                    report.discarded += 1;
                }
            }
        }
        drop(state);

        for _ in 0..report.redelivered {
            self.notify.notify_one();
        }
        report
    }

    async fn depth(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn in_flight(&self) -> usize {
        self.state.lock().await.leases.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        tracing::info!("Work queue closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use subconscious_core::types::new_job_id;

    use super::*;

    fn entry(prompt: &str) -> QueueEntry {
        QueueEntry::new(new_job_id(), prompt)
    }

    fn queue_with(policy: ReclaimPolicy) -> MemoryWorkQueue {
        MemoryWorkQueue::new(QueueConfig {
            visibility_timeout: Duration::from_secs(10),
            reclaim_policy: policy,
        })
    }

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let queue = MemoryWorkQueue::default();
        let a = entry("a");
        let b = entry("b");
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        let first = queue.claim("w1").await.unwrap();
        let second = queue.claim("w1").await.unwrap();

        assert_eq!(first.entry.job_id, a.job_id);
        assert_eq!(second.entry.job_id, b.job_id);
        assert_eq!(first.entry.attempts, 1);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn ack_removes_entry_for_good() {
        let queue = MemoryWorkQueue::default();
        queue.enqueue(entry("a")).await.unwrap();

        let claim = queue.claim("w1").await.unwrap();
        assert_eq!(queue.depth().await, 0);
        assert_eq!(queue.in_flight().await, 1);

        queue.ack(claim.id).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
        assert_matches!(queue.ack(claim.id).await, Err(QueueError::UnknownClaim(_)));
    }

    #[tokio::test]
    async fn claim_waits_until_enqueue() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim("w1").await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let e = entry("late");
        queue.enqueue(e.clone()).await.unwrap();
        let claim = waiter.await.unwrap().unwrap();
        assert_eq!(claim.entry.job_id, e.job_id);
    }

    #[tokio::test]
    async fn close_wakes_waiting_workers() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim("w1").await })
        };
        tokio::task::yield_now().await;

        queue.close();

        assert_matches!(waiter.await.unwrap(), Err(QueueError::Closed));
        assert_matches!(queue.enqueue(entry("x")).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn release_returns_entry_to_head() {
        let queue = MemoryWorkQueue::default();
        let a = entry("a");
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(entry("b")).await.unwrap();

        let claim = queue.claim("w1").await.unwrap();
        queue.release(claim.id).await.unwrap();

        let again = queue.claim("w2").await.unwrap();
        assert_eq!(again.entry.job_id, a.job_id);
        assert_eq!(again.entry.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_claim_is_redelivered() {
        let queue = queue_with(ReclaimPolicy::Redeliver);
        let e = entry("a");
        queue.enqueue(e.clone()).await.unwrap();
        let claim = queue.claim("crashed-worker").await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.reclaim_expired().await, ReclaimReport::default());

        tokio::time::advance(Duration::from_secs(6)).await;
        let report = queue.reclaim_expired().await;
        assert_eq!(report.redelivered, 1);
        assert_eq!(queue.depth().await, 1);

        // The stale claim can no longer be acknowledged.
        assert_matches!(queue.ack(claim.id).await, Err(QueueError::UnknownClaim(_)));

        let redelivered = queue.claim("w2").await.unwrap();
        assert_eq!(redelivered.entry.job_id, e.job_id);
        assert_eq!(redelivered.entry.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_claim_is_discarded_under_discard_policy() {
        let queue = queue_with(ReclaimPolicy::Discard);
        queue.enqueue(entry("a")).await.unwrap();
        queue.claim("crashed-worker").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = queue.reclaim_expired().await;

        assert_eq!(report.discarded, 1);
        assert_eq!(queue.depth().await, 0);
        assert_eq!(queue.in_flight().await, 0);
    }

    #[test]
    fn reclaim_policy_parses_from_env_strings() {
        assert_eq!("redeliver".parse::<ReclaimPolicy>(), Ok(ReclaimPolicy::Redeliver));
        assert_eq!(" Discard ".parse::<ReclaimPolicy>(), Ok(ReclaimPolicy::Discard));
        assert!("sometimes".parse::<ReclaimPolicy>().is_err());
    }
}
