//! The backend contract (§4.3): turning steps into running tasks and
//! answering "what's the status of X" regardless of whether X lives in a
//! local process table or a batch scheduler's queue.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{AllocationError, LaunchError, TransientProbeError};
use crate::model::{ProcessHandle, Step};
use crate::status::TaskStatus;
use crate::task::FailTask;

/// A backend capable of running steps and reporting on them.
///
/// Every method here mirrors an observable behavior from the reference test
/// suite: `report` returns `Unknown` for a name the launcher has never seen
/// (not an error — querying an unrecognized task is a normal occurrence when
/// a restart or monitor race is in play), `report_all` does the same per-name
/// over a batch, and `update` is the only place backend I/O happens — `report`
/// itself never blocks.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Reserve whatever backend resource a step needs before it can be
    /// launched (e.g. a SLURM allocation). A no-op for backends with nothing
    /// to reserve.
    async fn allocate(&mut self, steps: &[Step]) -> Result<(), AllocationError>;

    /// Launch every step in `steps`. Steps that fail to spawn are returned as
    /// [`FailTask`]s rather than aborting the whole batch.
    async fn launch(&mut self, steps: &[Step]) -> Result<Vec<FailTask>, LaunchError>;

    /// Begin tracking a task this launcher did not itself start — a
    /// reattachment after controller restart.
    fn add_monitored(&mut self, name: String, handle: ProcessHandle);

    /// Last-known status for `name`, without touching the backend.
    /// `Unknown` if `name` has never been launched or monitored here.
    fn report(&self, name: &str) -> TaskStatus;

    /// `report` over several names at once.
    fn report_all(&self, names: &[String]) -> BTreeMap<String, TaskStatus> {
        names
            .iter()
            .map(|n| (n.clone(), self.report(n)))
            .collect()
    }

    /// Refresh every non-terminal task's status against the backend. The
    /// only method on this trait allowed to perform I/O.
    async fn update(&mut self) -> Result<(), TransientProbeError>;

    /// Names of every task not yet in a terminal status.
    fn active_tasks(&self) -> Vec<String>;

    /// Cancel a task. Returns its status after the attempt (normally
    /// `Aborted`, or whatever terminal status it had already reached).
    fn cancel(&mut self, name: &str) -> TaskStatus;

    /// Snapshot every active task as a [`ProcessHandle`], for persistence
    /// across a controller restart.
    fn snapshot_handles(&self) -> BTreeMap<String, ProcessHandle>;
}

/// How a batch-backed [`Launcher`] actually talks to its scheduler: submit a
/// command line, get back its exit status and captured output. Kept as a
/// narrow seam so tests can substitute a fake scheduler without touching
/// process-spawning code at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &[String]) -> Result<CommandOutput, TransientProbeError>;
}

/// The result of invoking a backend command via [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}
