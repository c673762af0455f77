//! Workers that pull jobs off the queue and drive them to completion.
//!
//! A [`WorkerPool`] runs a fixed number of worker loops. Each loop claims a
//! job through the [`JobController`](subconscious_pipeline::JobController)
//! and hands it to a [`JobProducer`], which reports progress and result
//! fragments back through its [`JobContext`]. The bundled producer is the
//! [`InferenceSimulator`], which streams a canned reasoning tree.

pub mod pool;
pub mod producer;
pub mod simulation;
pub mod tree;

pub use pool::WorkerPool;
pub use producer::{JobContext, JobProducer, ProducerError};
pub use simulation::{InferenceSimulator, SimulationConfig};
pub use tree::{build_reasoning_tree, ReasoningNode};
