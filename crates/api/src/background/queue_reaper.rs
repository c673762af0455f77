//! Periodic reclaim of expired queue claims.
//!
//! A claim that is neither acknowledged nor released within the visibility
//! timeout is either put back at the head of the queue or dropped,
//! depending on the configured [`ReclaimPolicy`].
//!
//! [`ReclaimPolicy`]: subconscious_db::queue::ReclaimPolicy

use std::sync::Arc;
use std::time::Duration;

use subconscious_db::queue::WorkQueue;
use tokio_util::sync::CancellationToken;

/// Run the reclaim loop until `cancel` is triggered or the queue closes.
pub async fn run(queue: Arc<dyn WorkQueue>, reap_interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = reap_interval.as_secs(),
        "Queue reaper started"
    );

    let mut interval = tokio::time::interval(reap_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Queue reaper stopping");
                break;
            }
            _ = interval.tick() => {
                if queue.is_closed() {
                    tracing::info!("Queue closed, reaper stopping");
                    break;
                }
                let report = queue.reclaim_expired().await;
                if report.redelivered > 0 || report.discarded > 0 {
                    tracing::warn!(
                        redelivered = report.redelivered,
                        discarded = report.discarded,
                        "Queue reaper: reclaimed expired claims"
                    );
                }
            }
        }
    }
}
