//! Worker pool behaviour against in-memory components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use subconscious_core::status::JobStatus;
use subconscious_core::types::JobId;
use subconscious_core::validation::JobInput;
use subconscious_db::models::job::Job;
use subconscious_db::queue::MemoryWorkQueue;
use subconscious_db::repositories::MemoryJobStore;
use subconscious_events::{BusConfig, EventBus, EventPayload};
use subconscious_pipeline::{ControllerConfig, JobController};
use subconscious_worker::{
    InferenceSimulator, JobContext, JobProducer, ProducerError, SimulationConfig, WorkerPool,
};
use tokio_util::sync::CancellationToken;

fn controller() -> Arc<JobController> {
    Arc::new(JobController::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryWorkQueue::default()),
        Arc::new(EventBus::new(BusConfig::default())),
        ControllerConfig::default(),
    ))
}

async fn wait_terminal(controller: &JobController, id: JobId) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = controller.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job should finish")
}

struct Crashing;

#[async_trait]
impl JobProducer for Crashing {
    fn name(&self) -> &str {
        "crashing"
    }

    async fn produce(&self, ctx: &JobContext) -> Result<(), ProducerError> {
        ctx.start_running().await?;
        ctx.emit(serde_json::json!({"partial": true})).await?;
        Err(ProducerError::Failed("model crashed".into()))
    }
}

struct Panicking;

#[async_trait]
impl JobProducer for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn produce(&self, _ctx: &JobContext) -> Result<(), ProducerError> {
        panic!("producer bug");
    }
}

struct Sloppy;

#[async_trait]
impl JobProducer for Sloppy {
    fn name(&self) -> &str {
        "sloppy"
    }

    async fn produce(&self, ctx: &JobContext) -> Result<(), ProducerError> {
        // Emits before announcing that it is running.
        ctx.emit(serde_json::json!("too early")).await
    }
}

// ---------------------------------------------------------------------------
// Test: simulated jobs run to completion with ten fragments each
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulator_completes_every_job() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(
        Arc::clone(&ctl),
        Arc::new(InferenceSimulator::new(SimulationConfig::instant())),
        2,
    );
    let handles = pool.spawn(cancel.clone());

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(ctl.submit(JobInput::new(format!("question {i}"))).await.unwrap());
    }

    for id in ids {
        let job = wait_terminal(&ctl, id).await;
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result.len(), 10);
        assert_eq!(job.result[0]["title"], "Analyzing request");
        assert!(job.error.is_none());
        assert!(job.progress.is_none());
    }

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Test: warm-up publishes shrinking estimates before running
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn warmup_reports_decreasing_estimates() {
    let ctl = controller();
    let id = ctl.submit(JobInput::new("x")).await.unwrap();
    let mut sub = ctl.bus().subscribe(id, 1).await.unwrap();

    let cancel = CancellationToken::new();
    let config = SimulationConfig {
        warmup_min: Duration::from_millis(3000),
        warmup_max: Duration::from_millis(3000),
        node_delay_min: Duration::from_millis(100),
        node_delay_max: Duration::from_millis(100),
        progress_interval: Duration::from_millis(1000),
        warmup_timeout: None,
    };
    let _handles = WorkerPool::new(Arc::clone(&ctl), Arc::new(InferenceSimulator::new(config)), 1)
        .spawn(cancel.clone());

    let mut estimates = Vec::new();
    let mut statuses = Vec::new();
    while let Ok(event) = sub.recv().await {
        match event.payload {
            EventPayload::ProgressUpdated { progress } => {
                estimates.push(progress.estimated_wait_seconds.unwrap());
            }
            EventPayload::StatusChanged { status, .. } => statuses.push(status),
            EventPayload::ResultFragmentAppended { .. } => {}
        }
    }

    assert_eq!(
        statuses,
        vec![JobStatus::Warming, JobStatus::Running, JobStatus::Complete]
    );
    assert!(estimates.len() >= 3, "{estimates:?}");
    assert!(estimates.windows(2).all(|w| w[0] > w[1]), "{estimates:?}");
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: warm-up timeout fails the job with its own code
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn warmup_timeout_fails_job() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let config = SimulationConfig {
        warmup_min: Duration::from_millis(5000),
        warmup_max: Duration::from_millis(5000),
        warmup_timeout: Some(Duration::from_millis(500)),
        ..SimulationConfig::instant()
    };
    let _handles = WorkerPool::new(Arc::clone(&ctl), Arc::new(InferenceSimulator::new(config)), 1)
        .spawn(cancel.clone());

    let id = ctl.submit(JobInput::new("x")).await.unwrap();
    let job = wait_terminal(&ctl, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, "warmup_timeout");
    assert!(job.result.is_empty());
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: producer errors, panics and illegal reports fail only their job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn producer_failure_is_recorded() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let _handles = WorkerPool::new(Arc::clone(&ctl), Arc::new(Crashing), 1).spawn(cancel.clone());

    let id = ctl.submit(JobInput::new("x")).await.unwrap();
    let job = wait_terminal(&ctl, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.code, "producer_failure");
    assert_eq!(error.message, "model crashed");
    assert_eq!(job.result.len(), 1);
    cancel.cancel();
}

#[tokio::test]
async fn panicking_producer_does_not_kill_the_worker() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let _handles = WorkerPool::new(Arc::clone(&ctl), Arc::new(Panicking), 1).spawn(cancel.clone());

    let first = ctl.submit(JobInput::new("a")).await.unwrap();
    let second = ctl.submit(JobInput::new("b")).await.unwrap();

    for id in [first, second] {
        let job = wait_terminal(&ctl, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().message.contains("producer task aborted"));
    }
    cancel.cancel();
}

#[tokio::test]
async fn illegal_report_fails_with_invalid_transition() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let _handles = WorkerPool::new(Arc::clone(&ctl), Arc::new(Sloppy), 1).spawn(cancel.clone());

    let id = ctl.submit(JobInput::new("x")).await.unwrap();
    let job = wait_terminal(&ctl, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, "invalid_transition");
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: shutdown stops idle workers and fails the job in flight
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_stops_workers_and_fails_running_job() {
    let ctl = controller();
    let cancel = CancellationToken::new();
    let handles = WorkerPool::new(
        Arc::clone(&ctl),
        Arc::new(InferenceSimulator::new(SimulationConfig::default())),
        2,
    )
    .spawn(cancel.clone());

    let id = ctl.submit(JobInput::new("x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctl.get(id).await.unwrap().status, JobStatus::Warming);

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let job = ctl.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().message.contains("shut down"));
}

#[tokio::test]
async fn closing_the_queue_stops_workers() {
    let ctl = controller();
    let handles = WorkerPool::new(
        Arc::clone(&ctl),
        Arc::new(InferenceSimulator::new(SimulationConfig::instant())),
        3,
    )
    .spawn(CancellationToken::new());

    tokio::task::yield_now().await;
    ctl.queue().close();

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
