//! The orchestration event loop (§5/§6): turns a [`Planner`] + [`Launcher`]
//! pair into a run that drives a workplan to completion.
//!
//! Single-threaded and cooperative, like the controller loop it's modeled
//! on — one `tokio::task`, no internal locking, state mutated directly
//! between `await` points. Concurrency across steps comes from the backend
//! (a `Launcher` can have many tasks in flight at once), not from spawning
//! extra orchestrator tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use simwork_kernel::{Dag, FailTask, Launcher, Planner, Step, TaskStatus, Workplan};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error("workplan validation failed: {0}")]
    Validation(#[from] simwork_kernel::ValidationError),

    #[error("status probe failed: {0}")]
    Probe(#[from] simwork_kernel::TransientProbeError),

    #[error(
        "run stalled: {waiting} step(s) still waiting, but none are ready \
         (a dependency must have failed or been aborted)"
    )]
    Stalled { waiting: usize },

    #[error("step index {index} is out of range (plan has {len} step(s))")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("unknown step `{0}`")]
    UnknownStep(String),
}

/// Selects a single step for [`Orchestrator::run_step`], either by name or by
/// its position in the originating workplan's step list.
pub enum StepRef<'a> {
    Name(&'a str),
    Index(usize),
}

/// Outcome of a completed (or stalled) orchestration run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub aborted: Vec<String>,
    pub launch_failures: Vec<FailTask>,
}

/// Drives `planner`/`launcher` to completion against `plan`.
///
/// `poll_interval` is how long the loop sleeps between backend status
/// probes — the orchestrator's own analogue of the service controller's
/// `loop_delay` (see [`crate::service::ServiceController`]), but scoped to a
/// single run rather than a long-lived daemon.
pub struct Orchestrator<P, L> {
    planner: P,
    launcher: L,
    steps_by_name: BTreeMap<String, Step>,
    /// Step names in the order they appeared in the originating workplan,
    /// for [`StepRef::Index`] lookups — `steps_by_name` alone can't answer
    /// "the third step" once it's a `BTreeMap`.
    step_order: Vec<String>,
    /// Names of steps that already have a live Task record with the
    /// launcher — the spec's `task_lookup` (§4.6). A name stays in here
    /// from the tick it's first launched until it's retired (terminal status
    /// observed and removed from the planner), so `run()`'s tick never
    /// re-launches a step that's merely still running.
    dispatched: BTreeSet<String>,
    poll_interval: Duration,
}

impl<P: Planner, L: Launcher> Orchestrator<P, L> {
    pub fn new(plan: &Workplan, planner: P, launcher: L, poll_interval: Duration) -> Self {
        let steps_by_name = plan
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        let step_order = plan.steps.iter().map(|s| s.name.clone()).collect();
        Self {
            planner,
            launcher,
            steps_by_name,
            step_order,
            dispatched: BTreeSet::new(),
            poll_interval,
        }
    }

    /// Validate `plan`, build its [`Dag`], and construct an orchestrator
    /// ready to `run()`. Kept separate from `new` so callers that already
    /// have a `Dag` (e.g. reusing one across a `MonitoredPlanner`) can skip
    /// re-deriving it.
    pub fn validate_and_build(plan: &Workplan) -> Result<Dag, OrchestratorError> {
        Ok(Dag::from_workplan(plan)?)
    }

    /// Run the plan to completion: repeatedly dispatch every currently-ready
    /// step, poll the backend, retire terminal tasks, and repeat until the
    /// planner is exhausted or the run stalls.
    pub async fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        let mut report = RunReport::default();

        while !self.planner.is_exhausted() {
            let ready = self.planner.ready_batch();
            // §4.6 step 2/3: a ready step with no Task record yet gets
            // `_start`ed; a ready step that's already dispatched is merely
            // still running and must be reconciled, not relaunched.
            let to_launch: Vec<&String> = ready.iter().filter(|name| !self.dispatched.contains(*name)).collect();
            if !to_launch.is_empty() {
                let steps: Vec<Step> = to_launch
                    .iter()
                    .filter_map(|name| self.steps_by_name.get(*name).cloned())
                    .collect();
                let failures = self.launcher.launch(&steps).await.unwrap_or_else(|err| {
                    warn!(error = %err, "launch call itself failed; treating all as failed");
                    steps
                        .iter()
                        .map(|s| FailTask::new(&s.name, err.to_string()))
                        .collect()
                });
                for step in &steps {
                    self.dispatched.insert(step.name.clone());
                }
                for failure in failures {
                    warn!(step = %failure.step_name, reason = %failure.reason, "step failed to launch");
                    self.planner.remove(&failure.step_name)?;
                    self.dispatched.remove(&failure.step_name);
                    report.failed.push(failure.step_name.clone());
                    report.launch_failures.push(failure);
                }
            }

            let active = self.launcher.active_tasks();
            if active.is_empty() && !self.planner.is_exhausted() {
                let retired = report.succeeded.len() + report.failed.len() + report.aborted.len();
                let waiting = self.steps_by_name.len().saturating_sub(retired);
                return Err(OrchestratorError::Stalled { waiting });
            }

            self.launcher.update().await?;

            for name in active {
                let status = self.launcher.report(&name);
                if status.is_terminal() {
                    info!(step = %name, status = %status, "step reached terminal status");
                    self.planner.remove(&name)?;
                    self.dispatched.remove(&name);
                    match status {
                        TaskStatus::Done => {
                            self.planner.mark_satisfied(&name);
                            report.succeeded.push(name);
                        }
                        TaskStatus::Aborted => report.aborted.push(name),
                        TaskStatus::Failed => report.failed.push(name),
                        _ => unreachable!("is_terminal() guarantees one of the above"),
                    }
                }
            }

            if !self.planner.is_exhausted() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(report)
    }

    pub fn cancel_all(&mut self) {
        for name in self.launcher.active_tasks() {
            self.launcher.cancel(&name);
        }
    }

    /// Launch a single step (resolved by name or by its index in the
    /// originating workplan) and poll it to completion, ignoring the
    /// planner's dependency ordering entirely — a convenience entry point
    /// for ad hoc re-runs of one step, not a substitute for `run()`.
    pub async fn run_step(&mut self, which: StepRef<'_>) -> Result<TaskStatus, OrchestratorError> {
        let name = match which {
            StepRef::Name(name) => name.to_string(),
            StepRef::Index(index) => {
                self.step_order
                    .get(index)
                    .cloned()
                    .ok_or(OrchestratorError::IndexOutOfRange {
                        index,
                        len: self.step_order.len(),
                    })?
            }
        };
        let step = self
            .steps_by_name
            .get(&name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStep(name.clone()))?;

        let failures = self.launcher.launch(&[step]).await.unwrap_or_else(|err| {
            warn!(step = %name, error = %err, "launch call itself failed");
            vec![FailTask::new(&name, err.to_string())]
        });
        if !failures.is_empty() {
            return Ok(TaskStatus::Failed);
        }

        loop {
            self.launcher.update().await?;
            let status = self.launcher.report(&name);
            if status.is_terminal() {
                info!(step = %name, status = %status, "single-step run reached terminal status");
                return Ok(status);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
