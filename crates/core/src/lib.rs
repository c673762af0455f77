//! Shared domain vocabulary for the Subconscious job service.
//!
//! Everything in this crate is pure: identifiers, the job state machine,
//! the error taxonomy, input validation and the constants that name events
//! on the wire. Runtime components live in the `db`, `events` and
//! `pipeline` crates.

pub mod error;
pub mod job_events;
pub mod pagination;
pub mod status;
pub mod types;
pub mod validation;
