//! Job lifecycle orchestration.
//!
//! [`JobController`] is the single writer of job records: it validates each
//! change against the lifecycle graph, commits it to the store and then
//! publishes the matching event. [`JobStreamer`] turns a store snapshot plus
//! the job's bus topic into one gapless, duplicate-free stream per client.

pub mod lifecycle;
pub mod stream;

pub use lifecycle::{ClaimedJob, ControllerConfig, JobController};
pub use stream::{JobStream, JobStreamer, StreamEvent};
