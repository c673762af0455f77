//! Simulated inference backend.
//!
//! Warms up for a random duration while reporting a shrinking wait
//! estimate, then streams the reasoning tree one node at a time with random
//! pacing between nodes.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use subconscious_db::models::job::JobProgress;
use tokio::time::Instant;

use crate::producer::{JobContext, JobProducer, ProducerError};
use crate::tree::build_reasoning_tree;

/// Number of nodes in the streamed tree.
const TREE_NODES: u32 = 10;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub warmup_min: Duration,
    pub warmup_max: Duration,
    pub node_delay_min: Duration,
    pub node_delay_max: Duration,
    /// How often a progress update is published during warm-up.
    pub progress_interval: Duration,
    /// Fail with `warmup_timeout` if warm-up would take longer than this.
    pub warmup_timeout: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            warmup_min: Duration::from_millis(3000),
            warmup_max: Duration::from_millis(5000),
            node_delay_min: Duration::from_millis(300),
            node_delay_max: Duration::from_millis(800),
            progress_interval: Duration::from_millis(1000),
            warmup_timeout: None,
        }
    }
}

impl SimulationConfig {
    /// No waiting at all, for tests.
    pub fn instant() -> Self {
        Self {
            warmup_min: Duration::ZERO,
            warmup_max: Duration::ZERO,
            node_delay_min: Duration::ZERO,
            node_delay_max: Duration::ZERO,
            progress_interval: Duration::from_millis(10),
            warmup_timeout: None,
        }
    }

    /// Average time spent streaming the tree.
    fn expected_run_time(&self) -> Duration {
        (self.node_delay_min + self.node_delay_max) / 2 * TREE_NODES
    }
}

/// Uniform random duration in `[min, max]`.
fn jitter(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let lo = lo.as_millis() as u64;
    let hi = hi.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

/// Whole seconds left, rounded up.
fn seconds_left(remaining: Duration) -> u32 {
    let millis = remaining.as_millis();
    millis.div_ceil(1000) as u32
}

/// [`JobProducer`] that fakes a model warm-up and a reasoning trace.
pub struct InferenceSimulator {
    config: SimulationConfig,
}

impl InferenceSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    async fn warm_up(&self, ctx: &JobContext) -> Result<(), ProducerError> {
        let planned = jitter(self.config.warmup_min, self.config.warmup_max);
        let budget = match self.config.warmup_timeout {
            Some(timeout) if timeout < planned => timeout,
            _ => planned,
        };
        tracing::debug!(
            job_id = %ctx.job_id,
            warmup_ms = planned.as_millis() as u64,
            "Warming up",
        );

        let started = Instant::now();
        let deadline = started + budget;
        let mut ticker =
            tokio::time::interval(self.config.progress_interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ProducerError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    let remaining = planned.saturating_sub(started.elapsed());
                    let estimate = seconds_left(remaining + self.config.expected_run_time());
                    ctx.report_progress(
                        JobProgress::estimate(estimate).with_message("Warming up model"),
                    )
                    .await?;
                }
            }
        }

        if budget < planned {
            return Err(ProducerError::WarmupTimeout(budget));
        }
        Ok(())
    }
}

impl Default for InferenceSimulator {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

#[async_trait]
impl JobProducer for InferenceSimulator {
    fn name(&self) -> &str {
        "inference-simulator"
    }

    async fn produce(&self, ctx: &JobContext) -> Result<(), ProducerError> {
        self.warm_up(ctx).await?;
        ctx.start_running().await?;

        for node in build_reasoning_tree(&ctx.prompt) {
            let fragment = serde_json::to_value(&node)
                .map_err(|e| ProducerError::Failed(format!("cannot encode node: {e}")))?;
            ctx.emit(fragment).await?;
            ctx.pause(jitter(self.config.node_delay_min, self.config.node_delay_max))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        let min = Duration::from_millis(300);
        let max = Duration::from_millis(800);
        for _ in 0..100 {
            let d = jitter(min, max);
            assert!(d >= min && d <= max, "{d:?}");
        }
        assert_eq!(jitter(Duration::ZERO, Duration::ZERO), Duration::ZERO);
        // Swapped bounds are tolerated.
        let d = jitter(max, min);
        assert!(d >= min && d <= max);
    }

    #[test]
    fn seconds_round_up() {
        assert_eq!(seconds_left(Duration::ZERO), 0);
        assert_eq!(seconds_left(Duration::from_millis(1)), 1);
        assert_eq!(seconds_left(Duration::from_millis(1000)), 1);
        assert_eq!(seconds_left(Duration::from_millis(1001)), 2);
    }

    #[test]
    fn default_run_estimate_is_average_pacing() {
        assert_eq!(
            SimulationConfig::default().expected_run_time(),
            Duration::from_millis(5500)
        );
    }
}
