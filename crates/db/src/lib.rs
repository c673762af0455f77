//! Job records and the work queue.
//!
//! - [`repositories::JobStore`] is the authoritative record of every job,
//!   with [`repositories::MemoryJobStore`] as the in-process backend.
//! - [`queue::WorkQueue`] is the at-least-once handoff from submitters to
//!   workers, with [`queue::MemoryWorkQueue`] as the in-process backend.
//!
//! Both sit behind traits so the lifecycle controller can be exercised
//! against fakes.

pub mod models;
pub mod queue;
pub mod repositories;
