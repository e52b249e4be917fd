//! The task lifecycle state space.
//!
//! Ordering matters: callers compare statuses directly (`status < TaskStatus::Done`)
//! rather than matching on a `is_terminal` helper everywhere, so the discriminant
//! order below *is* the contract.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`crate::task::Task`].
///
/// Total order: `Unknown < Waiting < Ready < Active < Done < Aborted < Failed`.
/// Progression is monotonically non-decreasing for a given task, with one
/// exception: a task whose backing process id was recycled is promoted
/// directly to `Done` regardless of its prior status (see
/// [`crate::model::ProcessHandle`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TaskStatus {
    /// No observation has ever been made for this task.
    Unknown,
    /// Registered but not yet eligible to run (dependencies unresolved).
    Waiting,
    /// Eligible to run; not yet dispatched to a backend.
    Ready,
    /// Dispatched and running (or queued) on a backend.
    Active,
    /// Completed successfully.
    Done,
    /// Cancelled, by this process or externally.
    Aborted,
    /// Completed with a non-zero/error outcome.
    Failed,
}

impl TaskStatus {
    /// The three statuses from which no further transition is permitted.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Failed)
    }

    /// Parse a SLURM-style raw state string (case-insensitive).
    ///
    /// Any value not in the table below maps to [`TaskStatus::Unknown`] rather
    /// than erroring — §4.5 of the design requires raw-status mapping to be
    /// total over non-empty input.
    pub fn from_batch_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Waiting,
            "RUNNING" => Self::Active,
            "COMPLETED" => Self::Done,
            "CANCELLED" => Self::Aborted,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Waiting => "Waiting",
            Self::Ready => "Ready",
            Self::Active => "Active",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}
