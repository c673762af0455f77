//! WebSocket transport for job streams.
//!
//! Each connection follows exactly one job. Frames carry the same
//! `{type, sequence, payload}` JSON as the SSE `data` lines.

mod handler;

pub use handler::{ws_handler, HEARTBEAT_INTERVAL};
