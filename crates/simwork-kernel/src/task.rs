//! A single tracked unit of execution (§4.2).
//!
//! `Task` owns everything needed to start, poll, and cancel one OS process:
//! the pid, its creation timestamp (for recycled-pid detection), the command
//! line it was launched with, its exit code once known, and its current
//! [`TaskStatus`]. Batch-backed tasks reuse the same struct but never spawn a
//! local child — [`Task::query`]/[`Task::cancel`] degrade to pid-presence
//! checks for those.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use uuid::Uuid;

use crate::error::LaunchError;
use crate::model::{ProcessHandle, Step};
use crate::param::ParameterizedCommand;
use crate::status::TaskStatus;

/// Where a [`Task`]'s identity came from.
#[derive(Debug, Clone)]
pub enum TaskSource {
    /// A fresh task about to be launched from a workplan step.
    Step(Step),
    /// A task reattached from a previously-recorded [`ProcessHandle`]
    /// (controller restart).
    Process(ProcessHandle),
}

/// A step that could not be turned into a running process at all — a spawn
/// failure, an unknown application, a missing log directory. Recorded by the
/// Orchestrator instead of a live [`Task`] so one bad step doesn't abort the
/// rest of the run.
#[derive(Debug, Clone)]
pub struct FailTask {
    pub step_name: String,
    pub reason: String,
}

impl FailTask {
    pub fn new(step_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            reason: reason.into(),
        }
    }
}

/// One tracked unit of execution.
pub struct Task {
    pub task_id: Uuid,
    source: TaskSource,
    pid: Option<u32>,
    /// Creation timestamp of `pid`, µs since epoch, recorded at start/attach
    /// time. Compared against a later observation of the same pid to detect
    /// pid recycling.
    create_time: Option<i64>,
    cmd: Vec<String>,
    rc: Option<i32>,
    status: TaskStatus,
    child: Option<Child>,
}

impl Task {
    /// A task for a step that has not been started yet.
    pub fn new(source: TaskSource) -> Self {
        let task_id = match &source {
            TaskSource::Step(_) => Uuid::new_v4(),
            TaskSource::Process(handle) => handle.key,
        };
        Self {
            task_id,
            source,
            pid: None,
            create_time: None,
            cmd: Vec::new(),
            rc: None,
            status: TaskStatus::Waiting,
            child: None,
        }
    }

    /// Reattach to a process recorded before a controller restart. If the pid
    /// has since been recycled — some unrelated process now holds it, or
    /// nothing does — the task is promoted straight to `Done` rather than
    /// `Aborted`/`Failed`: we have no way to know what actually happened to
    /// it, and treating an ambiguous reattach as a hard failure would make
    /// every restart noisy.
    pub fn reattach(handle: ProcessHandle) -> Self {
        let mut task = Self::new(TaskSource::Process(handle.clone()));
        task.pid = Some(handle.pid);
        task.create_time = Some(handle.created_on);

        match observe(handle.pid) {
            Some(observed_create) if observed_create == handle.created_on => {
                task.status = TaskStatus::Active;
            }
            _ => {
                task.status = TaskStatus::Done;
            }
        }
        task
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn rc(&self) -> Option<i32> {
        self.rc
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    /// Spawn the process backing this task: `command.argv[0]` is the
    /// executable, the rest its arguments, `command.env` is applied on top
    /// of the controller's own environment. A log file named from a slug of
    /// the step name is opened under `log_dir` and the child's stdout+stderr
    /// are both redirected to it. Only valid for a freshly-constructed,
    /// step-sourced task.
    pub fn start(&mut self, command: ParameterizedCommand, log_dir: &Path) -> Result<(), LaunchError> {
        let TaskSource::Step(step) = &self.source else {
            return Err(LaunchError::NotAStep);
        };
        let Some(program) = command.argv.first() else {
            return Err(LaunchError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command line",
            )));
        };

        let log_path = log_dir.join(format!("{}.log", slugify(&step.name)));
        let log_file = File::create(&log_path).map_err(|source| LaunchError::LogFileUnavailable {
            path: log_path.display().to_string(),
            source,
        })?;
        let stderr_file = log_file.try_clone().map_err(|source| LaunchError::LogFileUnavailable {
            path: log_path.display().to_string(),
            source,
        })?;

        let child = Command::new(program)
            .args(&command.argv[1..])
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(LaunchError::SpawnFailed)?;

        let pid = child.id();
        self.pid = Some(pid);
        self.create_time = observe(pid).or_else(|| Some(epoch_micros()));
        self.cmd = command.argv;
        self.status = TaskStatus::Active;
        self.child = Some(child);
        Ok(())
    }

    /// Re-derive this task's status from the OS. A no-op once the task has
    /// reached a terminal status.
    pub fn query(&mut self) -> TaskStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        if let Some(child) = &mut self.child {
            if let Ok(Some(exit)) = child.try_wait() {
                self.rc = exit.code();
                self.status = if exit.success() {
                    TaskStatus::Done
                } else {
                    TaskStatus::Failed
                };
                return self.status;
            }
        }

        let Some(pid) = self.pid else {
            return self.status;
        };

        match observe(pid) {
            Some(observed_create) => {
                let recycled = self
                    .create_time
                    .is_some_and(|expected| expected != observed_create);
                self.status = if recycled {
                    TaskStatus::Done
                } else {
                    TaskStatus::Active
                };
            }
            None if self.child.is_none() => {
                // Reattached task whose pid is simply gone: no exit code to
                // recover, treat as a clean completion.
                self.status = TaskStatus::Done;
            }
            None => {}
        }

        self.status
    }

    /// Terminate the task. No-op if it has already reached a terminal
    /// status (including "reached it just now" — a cancel racing a natural
    /// exit must not clobber `Done` with `Aborted`).
    pub fn cancel(&mut self) -> TaskStatus {
        if self.query().is_terminal() {
            return self.status;
        }

        if let Some(pid) = self.pid {
            let nix_pid = NixPid::from_raw(pid as i32);
            for descendant in descendants_of(pid) {
                let _ = signal::kill(NixPid::from_raw(descendant as i32), Signal::SIGTERM);
            }
            let _ = signal::kill(nix_pid, Signal::SIGTERM);

            if let Some(child) = &mut self.child {
                if matches!(child.try_wait(), Ok(None) | Err(_)) {
                    std::thread::sleep(Duration::from_millis(100));
                    if matches!(child.try_wait(), Ok(None) | Err(_)) {
                        for descendant in descendants_of(pid) {
                            let _ = signal::kill(NixPid::from_raw(descendant as i32), Signal::SIGKILL);
                        }
                        let _ = signal::kill(nix_pid, Signal::SIGKILL);
                        let _ = child.wait();
                    }
                }
            }
        }

        self.rc = Some(-1);
        self.status = TaskStatus::Aborted;
        self.status
    }

    /// Snapshot this task's process identity for persistence across a
    /// controller restart. `None` before the task has ever been started.
    pub fn to_process_handle(&self, name: impl Into<String>) -> Option<ProcessHandle> {
        Some(ProcessHandle {
            pid: self.pid?,
            created_on: self.create_time?,
            name: name.into(),
            key: self.task_id,
        })
    }
}

/// Look up a pid's process creation timestamp via the OS process table.
/// Returns `None` if no such process currently exists.
fn observe(pid: u32) -> Option<i64> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]), true);
    system
        .process(SysPid::from_u32(pid))
        .map(|p| p.start_time() as i64 * 1_000_000)
}

/// Every live descendant of `pid`, deepest-first, via a full process-table
/// scan. Used by [`Task::cancel`] to signal children before the root so a
/// shell-wrapped executable doesn't leave orphaned grandchildren behind.
fn descendants_of(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let root = SysPid::from_u32(pid);
    let mut descendants = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (candidate_pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                descendants.push(candidate_pid.as_u32());
                frontier.push(*candidate_pid);
            }
        }
    }
    descendants.reverse();
    descendants
}

/// Collapse whitespace and lowercase, matching the reference slug used for
/// both log file names and rendered graph labels.
fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn epoch_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
