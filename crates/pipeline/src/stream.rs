//! Per-client job streams.
//!
//! A [`JobStream`] starts from a store snapshot (the catch-up event), then
//! follows the job's bus topic from the next sequence on. Anything at or
//! below the last delivered sequence is skipped, so a client never sees a
//! duplicate or an out-of-order event. If the subscription is lost (the
//! client lagged or the topic ended without a terminal event) the stream
//! re-reads the store and continues from there.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::json;
use subconscious_core::error::CoreError;
use subconscious_core::job_events::{EVENT_TYPE_ERROR, EVENT_TYPE_SNAPSHOT};
use subconscious_core::types::{JobId, Sequence};
use subconscious_db::models::job::Job;
use subconscious_db::repositories::JobStore;
use subconscious_events::{BusError, EventBus, EventPayload, JobEvent, Subscription, SubscriptionEnd};

/// Consecutive resyncs without new data before the stream gives up.
const MAX_RESYNCS_WITHOUT_PROGRESS: u32 = 3;

/// Pause before resubscribing after the bus refused a subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(100);

/// Error code sent to clients when the stream itself fails.
pub const STREAM_ERROR_CODE: &str = "BUS_UNAVAILABLE";

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// One item delivered to a stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The job as of attach (or resync) time.
    Snapshot(Box<Job>),
    /// A live event from the job's topic.
    Update(JobEvent),
    /// The stream failed; no further events follow.
    Error { sequence: Sequence, message: String },
}

impl StreamEvent {
    /// Wire type: `snapshot`, `status`, `progress`, `fragment` or `error`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => EVENT_TYPE_SNAPSHOT,
            Self::Update(event) => event.wire_type(),
            Self::Error { .. } => EVENT_TYPE_ERROR,
        }
    }

    pub fn sequence(&self) -> Sequence {
        match self {
            Self::Snapshot(job) => job.sequence,
            Self::Update(event) => event.sequence,
            Self::Error { sequence, .. } => *sequence,
        }
    }

    /// Whether the stream ends after this item.
    pub fn is_final(&self) -> bool {
        match self {
            Self::Snapshot(job) => job.status.is_terminal(),
            Self::Update(event) => event.is_terminal(),
            Self::Error { .. } => true,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Snapshot(job) => serde_json::to_value(job.as_ref()).unwrap_or_default(),
            Self::Update(event) => match &event.payload {
                EventPayload::StatusChanged {
                    status,
                    progress,
                    error,
                } => json!({
                    "status": status,
                    "progress": progress,
                    "error": error,
                    "timestamp": event.timestamp,
                }),
                EventPayload::ProgressUpdated { progress } => json!({
                    "progress": progress,
                    "timestamp": event.timestamp,
                }),
                EventPayload::ResultFragmentAppended { index, fragment } => json!({
                    "index": index,
                    "fragment": fragment,
                    "timestamp": event.timestamp,
                }),
            },
            Self::Error { message, .. } => json!({
                "code": STREAM_ERROR_CODE,
                "message": message,
            }),
        }
    }

    /// `{"type", "sequence", "payload"}` frame shared by SSE and WebSocket.
    pub fn to_wire(&self) -> serde_json::Value {
        json!({
            "type": self.event_type(),
            "sequence": self.sequence(),
            "payload": self.payload(),
        })
    }
}

// ---------------------------------------------------------------------------
// JobStreamer
// ---------------------------------------------------------------------------

/// Creates [`JobStream`]s.
#[derive(Clone)]
pub struct JobStreamer {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
}

impl JobStreamer {
    pub fn new(store: Arc<dyn JobStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Attach to `job_id`.
    ///
    /// With `resume_after = Some(k)` the stream resumes right after event
    /// `k` when the topic history still holds `k + 1`; otherwise it starts
    /// with a catch-up snapshot.
    pub async fn attach(
        &self,
        job_id: JobId,
        resume_after: Option<Sequence>,
    ) -> Result<JobStream, CoreError> {
        let snapshot = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        let mut stream = JobStream {
            job_id,
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            pending: VecDeque::new(),
            subscription: None,
            last_delivered: 0,
            finished: false,
            resyncs: 0,
        };

        if let Some(k) = resume_after.filter(|k| *k <= snapshot.sequence) {
            match self.bus.subscribe(job_id, k + 1).await {
                Ok(subscription) => {
                    tracing::debug!(job_id = %job_id, resume_after = k, "Stream resumed");
                    stream.last_delivered = k;
                    stream.subscription = Some(subscription);
                    if k == snapshot.sequence && snapshot.status.is_terminal() {
                        stream.finished = true;
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(job_id = %job_id, resume_after = k, error = %e, "Cannot resume, sending catch-up");
                }
            }
        }

        stream.last_delivered = snapshot.sequence;
        let terminal = snapshot.status.is_terminal();
        stream.pending.push_back(StreamEvent::Snapshot(Box::new(snapshot)));
        if terminal {
            stream.finished = true;
        } else {
            stream.subscribe().await;
        }
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// JobStream
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free events for one job and one client.
///
/// Dropping the stream unsubscribes it.
pub struct JobStream {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    pending: VecDeque<StreamEvent>,
    subscription: Option<Subscription>,
    last_delivered: Sequence,
    finished: bool,
    resyncs: u32,
}

impl std::fmt::Debug for JobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStream")
            .field("job_id", &self.job_id)
            .field("pending", &self.pending.len())
            .field("subscribed", &self.subscription.is_some())
            .field("last_delivered", &self.last_delivered)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl JobStream {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Sequence of the last event handed out (or skipped past on resume).
    pub fn last_delivered(&self) -> Sequence {
        self.last_delivered
    }

    /// Next event, or `None` once the stream is over.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                self.subscription = None;
                return None;
            }

            let received = match self.subscription.as_mut() {
                Some(subscription) => subscription.recv().await,
                None => Err(SubscriptionEnd::Closed),
            };

            match received {
                Ok(event) if event.sequence <= self.last_delivered => continue,
                Ok(event) => {
                    self.last_delivered = event.sequence;
                    self.resyncs = 0;
                    if event.is_terminal() {
                        self.finished = true;
                    }
                    return Some(StreamEvent::Update(event));
                }
                Err(end) => {
                    self.subscription = None;
                    if let Err(e) = self.resync(end).await {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Job stream failed");
                        self.finished = true;
                        return Some(StreamEvent::Error {
                            sequence: self.last_delivered,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }

    async fn subscribe(&mut self) {
        match self.bus.subscribe(self.job_id, self.last_delivered + 1).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                tracing::debug!(job_id = %self.job_id, error = %e, "Subscribe failed");
                if matches!(e, BusError::ShutDown | BusError::UnknownTopic(_)) {
                    tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                }
            }
        }
    }

    /// Re-read the store after losing the subscription, emitting a fresh
    /// catch-up if the job moved on, and subscribe again.
    async fn resync(&mut self, reason: SubscriptionEnd) -> Result<(), CoreError> {
        self.resyncs += 1;
        if self.resyncs > MAX_RESYNCS_WITHOUT_PROGRESS {
            return Err(CoreError::BusUnavailable(format!(
                "lost the event feed for job {} {} times in a row",
                self.job_id, MAX_RESYNCS_WITHOUT_PROGRESS,
            )));
        }
        tracing::debug!(job_id = %self.job_id, ?reason, attempt = self.resyncs, "Resyncing job stream");

        let snapshot = self
            .store
            .get(self.job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(self.job_id))?;

        let terminal = snapshot.status.is_terminal();
        if snapshot.sequence > self.last_delivered {
            self.last_delivered = snapshot.sequence;
            self.resyncs = 0;
            self.pending.push_back(StreamEvent::Snapshot(Box::new(snapshot)));
        }
        if terminal {
            self.finished = true;
            return Ok(());
        }

        self.subscribe().await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
