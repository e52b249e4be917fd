//! Shared error types for the orchestration engine.
//!
//! Mirrors §7 of the design: each error kind the core must distinguish gets
//! its own variant or type, never a single catch-all string.

use thiserror::Error;

/// Malformed or unsupported input. Never retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("step name must be non-empty")]
    EmptyStepName,

    #[error("duplicate step name `{0}`")]
    DuplicateStepName(String),

    #[error("workplan must contain at least one step")]
    EmptyWorkplan,

    #[error("dependency cycle detected involving step `{0}`")]
    Cycle(String),

    #[error("step `{0}` depends on unknown step `{1}`")]
    UnknownDependency(String, String),

    #[error("unknown application `{0}`")]
    UnknownApplication(String),

    #[error("invalid raw status `{0}`")]
    InvalidRawStatus(String),

    #[error("end_date must be strictly after start_date")]
    NonPositiveSpan,

    #[error("planner operation referenced unknown step `{0}`")]
    UnknownStep(String),

    #[error("step `{0}` was already removed from the planner")]
    AlreadyRemoved(String),
}

/// Backend resource acquisition failed (e.g. no SLURM allocation).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocationError {
    #[error("failed to acquire backend allocation: {0}")]
    Failed(String),
}

/// Process spawn failed. Captured into a `FailTask`, never propagated to the
/// Orchestrator's caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    #[error("application `{0}` has no registered executable template")]
    UnknownApplication(String),

    #[error("failed to open log file {path}: {source}")]
    LogFileUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("task source is a reattached process handle, not a step")]
    NotAStep,
}

/// A single status query against a backend failed transiently (I/O error,
/// backend unavailable, malformed output on an otherwise live connection).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransientProbeError {
    #[error("status probe failed: {0}")]
    Failed(String),

    #[error("status probe invoked with no names to query")]
    EmptyQuery,
}
