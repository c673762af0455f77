//! Subconscious per-job event bus.
//!
//! - [`EventBus`]: one topic per job, each with bounded history and a
//!   bounded buffer per subscriber.
//! - [`JobEvent`]: the envelope published for every committed job change.
//! - [`Subscription`]: a handle yielding replayed history followed by live
//!   events.

pub mod bus;
pub mod event;

pub use bus::{BusConfig, BusError, BusStats, EventBus, Subscription, SubscriptionEnd};
pub use event::{EventPayload, JobEvent};
