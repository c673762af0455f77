//! Periodic pruning of closed event topics.
//!
//! A topic closes when its job reaches a terminal state but stays around so
//! late clients can still replay its history. Once a closed topic is older
//! than the retention period it is dropped; later clients fall back to the
//! stored snapshot.

use std::sync::Arc;
use std::time::Duration;

use subconscious_events::EventBus;
use tokio_util::sync::CancellationToken;

/// Run the topic pruning loop until `cancel` is triggered.
pub async fn run(
    bus: Arc<EventBus>,
    retention: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = sweep_interval.as_secs(),
        "Topic retention job started"
    );

    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Topic retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let pruned = bus.prune_closed(retention).await;
                if pruned > 0 {
                    tracing::info!(pruned, "Topic retention: pruned closed topics");
                } else {
                    tracing::debug!("Topic retention: nothing to prune");
                }
            }
        }
    }
}
