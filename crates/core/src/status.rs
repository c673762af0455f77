//! Job lifecycle states and the legal transitions between them.
//!
//! ```text
//! Queued  -> Warming  -> Running -> Complete
//!    |          |           |
//!    +----------+-----------+-----> Failed
//! ```
//!
//! `Queued` is the only initial state. `Complete` and `Failed` are terminal:
//! they have no outgoing transitions and accept no further updates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Background job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Warming,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Warming => "warming",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Whether the job can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Warming)
                | (Warming, Running)
                | (Running, Complete)
                | (Running, Failed)
                | (Warming, Failed)
                | (Queued, Failed)
        )
    }

    /// Progress snapshots may change in any non-terminal state.
    pub fn accepts_progress(self) -> bool {
        !self.is_terminal()
    }

    /// Result fragments are only produced while running.
    pub fn accepts_fragments(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that `path` starts at `Queued` and only follows legal edges.
///
/// Used to assert on the status sequence an observer saw for one job.
pub fn is_legal_path(path: &[JobStatus]) -> bool {
    match path.first() {
        Some(JobStatus::Queued) => path.windows(2).all(|w| w[0].can_transition_to(w[1])),
        _ => false,
    }
}
