//! Background maintenance tasks and the worker pool.
//!
//! Each submodule provides a long-running async function intended to be
//! spawned via `tokio::spawn`. All tasks accept a [`CancellationToken`]
//! for graceful shutdown.

pub mod queue_reaper;
pub mod topic_retention;

use std::sync::Arc;
use std::time::Duration;

use subconscious_worker::{InferenceSimulator, WorkerPool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Start the worker pool and every maintenance task.
///
/// The returned handles finish once `cancel` fires; workers also stop when
/// the queue closes.
pub fn spawn_all(state: &AppState, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let config = &state.config;
    let controller = &state.controller;

    let producer = Arc::new(InferenceSimulator::new(config.simulation.clone()));
    let mut handles = WorkerPool::new(Arc::clone(controller), producer, config.worker_count)
        .spawn(cancel.clone());

    handles.push(tokio::spawn(queue_reaper::run(
        Arc::clone(controller.queue()),
        Duration::from_secs(config.queue_reap_interval_secs),
        cancel.clone(),
    )));

    handles.push(tokio::spawn(topic_retention::run(
        Arc::clone(controller.bus()),
        Duration::from_secs(config.topic_retention_secs),
        Duration::from_secs(config.topic_sweep_interval_secs),
        cancel.clone(),
    )));

    handles
}
