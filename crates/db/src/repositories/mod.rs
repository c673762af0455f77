//! Storage seams for job records.

mod job_store;

pub use job_store::{JobStore, MemoryJobStore};
