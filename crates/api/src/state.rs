use std::sync::Arc;

use subconscious_db::queue::MemoryWorkQueue;
use subconscious_db::repositories::{JobStore, MemoryJobStore};
use subconscious_events::EventBus;
use subconscious_pipeline::{JobController, JobStreamer};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The only writer of job records.
    pub controller: Arc<JobController>,
    /// Attaches streaming clients to jobs.
    pub streamer: JobStreamer,
}

impl AppState {
    /// Wire the in-memory store, queue and bus together.
    pub fn new(config: ServerConfig) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryWorkQueue::new(config.queue.clone()));
        let bus = Arc::new(EventBus::new(config.bus.clone()));

        let controller = Arc::new(JobController::new(
            Arc::clone(&store),
            queue,
            Arc::clone(&bus),
            config.controller.clone(),
        ));
        let streamer = JobStreamer::new(store, bus);

        Self {
            config: Arc::new(config),
            controller,
            streamer,
        }
    }
}
