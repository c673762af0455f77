//! Per-job publish/subscribe hub.
//!
//! Every job gets its own topic. A topic keeps the most recent events in a
//! bounded history so late subscribers can replay from any retained
//! sequence, and fans live events out to an arena of bounded subscriber
//! channels. Publishing never waits: a subscriber whose buffer is full is
//! evicted and learns about it through [`SubscriptionEnd::Lagged`].
//!
//! [`EventBus`] is shared via `Arc<EventBus>`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use subconscious_core::error::CoreError;
use subconscious_core::types::{JobId, Sequence};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;

use crate::event::JobEvent;

/// Default number of events retained per topic.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Default number of undelivered events a subscriber may hold.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

type SubscriberId = u64;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub history_capacity: usize,
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("No topic for job {0}")]
    UnknownTopic(JobId),

    #[error("Topic for job {0} is closed")]
    TopicClosed(JobId),

    #[error("Out of order publish for job {job_id}: sequence {got} after {last}")]
    OutOfOrder {
        job_id: JobId,
        last: Sequence,
        got: Sequence,
    },

    /// The requested start sequence has already been evicted from history.
    #[error("History for job {job_id} starts at {oldest}, cannot replay from {requested}")]
    HistoryGap {
        job_id: JobId,
        requested: Sequence,
        oldest: Sequence,
    },

    #[error("Event bus is shut down")]
    ShutDown,
}

impl From<BusError> for CoreError {
    fn from(err: BusError) -> Self {
        CoreError::BusUnavailable(err.to_string())
    }
}

/// Why a [`Subscription`] stopped yielding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The subscriber fell behind and was evicted. Events may be missing.
    Lagged,
    /// The topic was closed (or the bus shut down) and every buffered event
    /// has been delivered.
    Closed,
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub topics: usize,
    pub open_topics: usize,
    pub subscribers: usize,
}

// ---------------------------------------------------------------------------
// Topic state
// ---------------------------------------------------------------------------

struct Subscriber {
    sender: mpsc::Sender<JobEvent>,
    lagged: Arc<AtomicBool>,
}

struct Topic {
    history: VecDeque<JobEvent>,
    last_sequence: Sequence,
    subscribers: HashMap<SubscriberId, Subscriber>,
    closed_at: Option<Instant>,
}

impl Topic {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            last_sequence: 0,
            subscribers: HashMap::new(),
            closed_at: None,
        }
    }

    fn close(&mut self) {
        if self.closed_at.is_none() {
            self.closed_at = Some(Instant::now());
        }
        // Dropping the senders ends each subscription once it drains.
        self.subscribers.clear();
    }

    /// First sequence a new subscription can replay from.
    fn oldest_available(&self) -> Sequence {
        self.history
            .front()
            .map(|e| e.sequence)
            .unwrap_or(self.last_sequence + 1)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// In-process per-job event bus.
///
/// Publish and subscribe on one topic are serialized by the topic lock, so
/// an event published concurrently with a subscribe lands either in the
/// replay or in the live feed, never in neither and never in both.
pub struct EventBus {
    topics: RwLock<HashMap<JobId, Arc<Mutex<Topic>>>>,
    config: BusConfig,
    next_subscriber: AtomicU64,
    shut_down: AtomicBool,
    dropped_publishes: AtomicU64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
            next_subscriber: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            dropped_publishes: AtomicU64::new(0),
        }
    }

    async fn topic(&self, job_id: JobId) -> Result<Arc<Mutex<Topic>>, BusError> {
        self.topics
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(BusError::UnknownTopic(job_id))
    }

    /// Create the topic for `job_id`. Opening an existing topic is a no-op.
    pub async fn open(&self, job_id: JobId) -> Result<(), BusError> {
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }
        self.topics
            .write()
            .await
            .entry(job_id)
            .or_insert_with(|| Arc::new(Mutex::new(Topic::new())));
        Ok(())
    }

    /// Append `event` to its topic and hand it to every live subscriber.
    ///
    /// Returns the number of subscribers that received the event. Having no
    /// subscribers is not an error.
    pub async fn publish(&self, event: JobEvent) -> Result<usize, BusError> {
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }
        let job_id = event.job_id;
        let topic = self.topic(job_id).await?;
        let mut topic = topic.lock().await;

        if topic.closed_at.is_some() {
            return Err(BusError::TopicClosed(job_id));
        }
        if event.sequence <= topic.last_sequence {
            return Err(BusError::OutOfOrder {
                job_id,
                last: topic.last_sequence,
                got: event.sequence,
            });
        }

        topic.last_sequence = event.sequence;
        topic.history.push_back(event.clone());
        while topic.history.len() > self.config.history_capacity {
            topic.history.pop_front();
        }

        let mut delivered = 0;
        topic.subscribers.retain(|id, subscriber| {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        job_id = %job_id,
                        subscriber_id = id,
                        sequence = event.sequence,
                        "Subscriber buffer full, disconnecting",
                    );
                    subscriber.lagged.store(true, Ordering::SeqCst);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        Ok(delivered)
    }

    /// Subscribe to `job_id`, replaying retained events with
    /// `sequence >= from` before any live event.
    ///
    /// Subscribing to a closed topic is allowed: the handle replays the
    /// retained history and then reports [`SubscriptionEnd::Closed`].
    pub async fn subscribe(&self, job_id: JobId, from: Sequence) -> Result<Subscription, BusError> {
        if self.is_shut_down() {
            return Err(BusError::ShutDown);
        }
        let handle = self.topic(job_id).await?;
        let mut topic = handle.lock().await;
        topic.subscribers.retain(|_, s| !s.sender.is_closed());

        let oldest = topic.oldest_available();
        if from < oldest && oldest > 1 {
            return Err(BusError::HistoryGap {
                job_id,
                requested: from,
                oldest,
            });
        }

        let replay: Vec<JobEvent> = topic
            .history
            .iter()
            .filter(|e| e.sequence >= from)
            .cloned()
            .collect();

        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1) + replay.len());
        for event in replay {
            // Capacity covers the whole replay.
            let _ = sender.try_send(event);
        }

        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let lagged = Arc::new(AtomicBool::new(false));
        if topic.closed_at.is_none() {
            topic.subscribers.insert(
                id,
                Subscriber {
                    sender,
                    lagged: Arc::clone(&lagged),
                },
            );
        }

        tracing::debug!(job_id = %job_id, subscriber_id = id, from, "Subscribed to job topic");
        Ok(Subscription {
            job_id,
            id,
            receiver,
            lagged,
            topic: Arc::downgrade(&handle),
        })
    }

    /// Remove a subscriber and wait until it is gone from its topic.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        if let Ok(topic) = self.topic(subscription.job_id).await {
            topic.lock().await.subscribers.remove(&subscription.id);
        }
    }

    /// Subscribers currently registered on `job_id`, including any whose
    /// handle is gone but not yet removed.
    pub async fn subscriber_count(&self, job_id: JobId) -> Result<usize, BusError> {
        let topic = self.topic(job_id).await?;
        let count = topic.lock().await.subscribers.len();
        Ok(count)
    }

    /// Stop accepting events for `job_id` and end its live subscriptions.
    /// History is kept until [`prune_closed`](Self::prune_closed) removes it.
    pub async fn close(&self, job_id: JobId) -> Result<(), BusError> {
        let topic = self.topic(job_id).await?;
        topic.lock().await.close();
        tracing::debug!(job_id = %job_id, "Job topic closed");
        Ok(())
    }

    /// Drop topics that have been closed for at least `retention`.
    /// Returns the number of topics removed.
    pub async fn prune_closed(&self, retention: Duration) -> usize {
        let candidates: Vec<(JobId, Arc<Mutex<Topic>>)> = self
            .topics
            .read()
            .await
            .iter()
            .map(|(id, topic)| (*id, Arc::clone(topic)))
            .collect();

        let mut expired = Vec::new();
        for (job_id, topic) in candidates {
            let topic = topic.lock().await;
            if topic.closed_at.is_some_and(|at| at.elapsed() >= retention) {
                expired.push(job_id);
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut topics = self.topics.write().await;
        for job_id in &expired {
            topics.remove(job_id);
        }
        expired.len()
    }

    /// Close every topic and refuse further opens, publishes and subscribes.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let topics: Vec<Arc<Mutex<Topic>>> =
            self.topics.read().await.values().cloned().collect();
        for topic in topics {
            topic.lock().await.close();
        }
        tracing::info!("Event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Count a publish that failed after its store write was committed.
    pub fn record_dropped_publish(&self) {
        self.dropped_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_publishes(&self) -> u64 {
        self.dropped_publishes.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> BusStats {
        let topics: Vec<Arc<Mutex<Topic>>> =
            self.topics.read().await.values().cloned().collect();
        let mut stats = BusStats {
            topics: topics.len(),
            ..BusStats::default()
        };
        for topic in topics {
            let topic = topic.lock().await;
            if topic.closed_at.is_none() {
                stats.open_topics += 1;
            }
            stats.subscribers += topic
                .subscribers
                .values()
                .filter(|s| !s.sender.is_closed())
                .count();
        }
        stats
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of one subscriber.
///
/// Dropping the handle unsubscribes: the subscriber is removed from its
/// topic right away, or by a spawned task when the topic lock is busy.
pub struct Subscription {
    job_id: JobId,
    id: SubscriberId,
    receiver: mpsc::Receiver<JobEvent>,
    lagged: Arc<AtomicBool>,
    topic: Weak<Mutex<Topic>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("id", &self.id)
            .field("lagged", &self.lagged.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event in publish order, or why there will be no more.
    pub async fn recv(&mut self) -> Result<JobEvent, SubscriptionEnd> {
        match self.receiver.recv().await {
            Some(event) => Ok(event),
            None if self.lagged.load(Ordering::SeqCst) => Err(SubscriptionEnd::Lagged),
            None => Err(SubscriptionEnd::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();

        let Some(topic) = self.topic.upgrade() else {
            return;
        };
        let id = self.id;
        if let Ok(mut guard) = topic.try_lock() {
            guard.subscribers.remove(&id);
            return;
        }
        // Lock is held elsewhere; `subscribe` and `publish` also sweep
        // closed senders, so a missing runtime only delays removal.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                topic.lock().await.subscribers.remove(&id);
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
