//! Batch-scheduler [`Launcher`] (the SLURM-shaped backend from §4.3).
//!
//! Submission and polling both go through a [`CommandRunner`] rather than
//! `std::process` directly, so tests exercise the retry/backoff logic with a
//! scripted fake instead of a real scheduler binary. The step name is the
//! canonical identifier on both sides of this launcher — we never mint a
//! separate job id, so a step and the batch job that runs it are always
//! addressable by the same string.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simwork_kernel::{
    AllocationError, CommandParameterizer, CommandRunner, FailTask, LaunchError, Launcher,
    ProcessHandle, Step, TaskStatus, TransientProbeError,
};
use tracing::{debug, warn};

/// How a [`BatchLauncher`] builds the submission and polling command lines
/// around the step's own parameterized command.
pub trait BatchCommandBuilder: Send + Sync {
    /// Wrap a step's own command so the scheduler runs it (e.g. prefix with
    /// `sbatch --job-name <step> --wrap`).
    fn submit(&self, step_name: &str, inner_cmd: &[String]) -> Vec<String>;
    /// Build a single command that reports raw state for every name in
    /// `names` (e.g. `squeue --name <names> --format=%j %T`).
    fn poll(&self, names: &[String]) -> Vec<String>;
}

pub struct BatchLauncher<R, B> {
    runner: R,
    builder: B,
    parameterizer: Arc<dyn CommandParameterizer>,
    statuses: BTreeMap<String, TaskStatus>,
    max_retries: u32,
    retry_delay: Duration,
}

impl<R: CommandRunner, B: BatchCommandBuilder> BatchLauncher<R, B> {
    pub fn new(runner: R, builder: B, parameterizer: impl CommandParameterizer + 'static) -> Self {
        Self {
            runner,
            builder,
            parameterizer: Arc::new(parameterizer),
            statuses: BTreeMap::new(),
            max_retries: 99,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Override the default 99-attempt / 5s backoff, mainly for tests.
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

#[async_trait]
impl<R: CommandRunner, B: BatchCommandBuilder> Launcher for BatchLauncher<R, B> {
    /// The reference backend has no separate reservation phase: submission
    /// itself acquires the allocation.
    async fn allocate(&mut self, _steps: &[Step]) -> Result<(), AllocationError> {
        Ok(())
    }

    async fn launch(&mut self, steps: &[Step]) -> Result<Vec<FailTask>, LaunchError> {
        let mut failures = Vec::new();
        for step in steps {
            let inner = match self.parameterizer.parameterize(step) {
                Ok(cmd) => cmd,
                Err(err) => {
                    failures.push(FailTask::new(&step.name, err.to_string()));
                    continue;
                }
            };
            let submit_cmd = self.builder.submit(&step.name, &inner.flatten());
            match self.runner.run(&submit_cmd).await {
                Ok(output) if output.success() => {
                    self.statuses.insert(step.name.clone(), TaskStatus::Active);
                }
                Ok(output) => {
                    failures.push(FailTask::new(&step.name, output.stderr));
                }
                Err(err) => {
                    failures.push(FailTask::new(&step.name, err.to_string()));
                }
            }
        }
        Ok(failures)
    }

    fn add_monitored(&mut self, name: String, _handle: ProcessHandle) {
        // A batch job has no local pid to recycle-check against; trust the
        // scheduler's own job-state table on the next `update`.
        self.statuses.insert(name, TaskStatus::Active);
    }

    fn report(&self, name: &str) -> TaskStatus {
        self.statuses.get(name).copied().unwrap_or(TaskStatus::Unknown)
    }

    /// Polls until every name passed in reaches a terminal status or the
    /// retry budget is exhausted. Per §4.5, the retry wrapper treats *any*
    /// non-terminal observed status as a retryable condition, not just a
    /// transport-level failure — a command-level error (non-zero exit, a
    /// `CommandRunner` error) is retried the same way, up to the same
    /// budget. Exhausting the budget while a task remains non-terminal is
    /// not itself an error: the probe returns its last observation rather
    /// than fabricating a terminal value. Querying with no active tasks at
    /// all is rejected outright (§4.5 "empty input is an error"), distinct
    /// from an empty *poll result*, which is never an error.
    async fn update(&mut self) -> Result<(), TransientProbeError> {
        let mut pending = self.active_tasks();
        if pending.is_empty() {
            return Err(TransientProbeError::EmptyQuery);
        }

        let mut attempt = 0u32;
        loop {
            let poll_cmd = self.builder.poll(&pending);
            match self.runner.run(&poll_cmd).await {
                Ok(output) if output.success() => {
                    // §4.5: "unknown names are absent from the result" — a
                    // name missing from this poll (e.g. a job that already
                    // left squeue) is not observed as `Unknown`, it's simply
                    // not reported on this round. Forcing it down would
                    // violate the status-monotonicity invariant (§3/§8) for
                    // a job that already reached a terminal state elsewhere.
                    let raw = parse_name_state_pairs(&output.stdout);
                    for name in &pending {
                        let Some(state) = raw.get(name) else { continue };
                        let status = TaskStatus::from_batch_raw(state);
                        let before = self.statuses.insert(name.clone(), status);
                        if before != Some(status) {
                            debug!(step = %name, from = ?before, to = %status, "batch task status transition");
                        }
                    }
                    pending.retain(|name| !self.report(name).is_terminal());
                    if pending.is_empty() {
                        return Ok(());
                    }
                }
                Ok(output) => {
                    if attempt >= self.max_retries {
                        return Err(TransientProbeError::Failed(output.stderr));
                    }
                    warn!(attempt, "batch status probe returned non-zero, retrying");
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "batch status probe failed, retrying");
                }
            }

            attempt += 1;
            if attempt > self.max_retries {
                // Budget exhausted with some names still non-terminal: return
                // the last observed (non-terminal) status rather than erroring.
                return Ok(());
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    fn active_tasks(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn cancel(&mut self, name: &str) -> TaskStatus {
        // Synchronous cancellation of a batch job requires an `scancel`-style
        // round trip; that goes through the same CommandRunner as everything
        // else, but the `Launcher::cancel` contract is synchronous, so the
        // caller drives the follow-up `update()` that observes the result.
        if let Some(status) = self.statuses.get(name).copied() {
            if !status.is_terminal() {
                self.statuses.insert(name.to_string(), TaskStatus::Aborted);
                return TaskStatus::Aborted;
            }
            return status;
        }
        TaskStatus::Unknown
    }

    fn snapshot_handles(&self) -> BTreeMap<String, ProcessHandle> {
        // Batch jobs are reattached by step name through the scheduler, not
        // by pid, so there is nothing meaningful to snapshot here.
        BTreeMap::new()
    }
}

/// Parse `name state` pairs, one per line, as produced by a `squeue
/// --format="%j %T"`-style poll command.
fn parse_name_state_pairs(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next()?;
            Some((name.to_string(), state.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simwork_kernel::{CommandOutput, FlagStyleParameterizer};
    use std::sync::Mutex;

    struct SqueueBuilder;
    impl BatchCommandBuilder for SqueueBuilder {
        fn submit(&self, step_name: &str, inner_cmd: &[String]) -> Vec<String> {
            let mut cmd = vec!["sbatch".to_string(), "--job-name".to_string(), step_name.to_string(), "--wrap".to_string()];
            cmd.push(inner_cmd.join(" "));
            cmd
        }
        fn poll(&self, names: &[String]) -> Vec<String> {
            let mut cmd = vec!["squeue".to_string(), "--format=%j %T".to_string()];
            cmd.extend(names.iter().cloned());
            cmd
        }
    }

    struct ScriptedRunner {
        responses: Mutex<Vec<Result<CommandOutput, TransientProbeError>>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, _cmd: &[String]) -> Result<CommandOutput, TransientProbeError> {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok(stdout: &str) -> Result<CommandOutput, TransientProbeError> {
        Ok(CommandOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[tokio::test]
    async fn launch_marks_submitted_step_active() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![ok("")]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        );
        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        let failures = launcher.launch(&[step]).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(launcher.report("s1"), TaskStatus::Active);
    }

    #[tokio::test]
    async fn update_retries_on_transient_command_failure_then_succeeds() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![
                ok(""),
                Err(TransientProbeError::Failed("squeue: connection refused".into())),
                ok("s1 RUNNING"),
            ]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        )
        .with_retry_policy(3, Duration::from_millis(1));

        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        launcher.launch(&[step]).await.unwrap();
        launcher.update().await.unwrap();
        assert_eq!(launcher.report("s1"), TaskStatus::Active);
    }

    /// §8 scenario 3: a status query reports a non-terminal state three
    /// times before reporting terminal. Per §4.5 the retry wrapper treats
    /// any non-terminal observation as retryable, so a single `update()`
    /// call polls through all four observations and settles on `Done`.
    #[tokio::test]
    async fn update_polls_through_non_terminal_observations_to_a_terminal_one() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![
                ok(""),
                ok("s1 RUNNING"),
                ok("s1 RUNNING"),
                ok("s1 RUNNING"),
                ok("s1 COMPLETED"),
            ]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        )
        .with_retry_policy(10, Duration::from_millis(1));

        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        launcher.launch(&[step]).await.unwrap();
        launcher.update().await.unwrap();
        assert_eq!(launcher.report("s1"), TaskStatus::Done);
    }

    /// A probe that never reaches a terminal state within the retry budget
    /// returns its last observed (non-terminal) status rather than erroring
    /// or fabricating a terminal value (§4.5, §8 "boundary behaviors").
    #[tokio::test]
    async fn update_returns_last_observed_status_when_retry_budget_exhausted() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![
                ok(""),
                ok("s1 RUNNING"),
                ok("s1 PENDING"),
                ok("s1 RUNNING"),
            ]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        )
        .with_retry_policy(2, Duration::from_millis(1));

        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        launcher.launch(&[step]).await.unwrap();
        launcher.update().await.unwrap();
        assert_eq!(launcher.report("s1"), TaskStatus::Active);
    }

    /// A job can leave `squeue`'s output the moment it completes, so a poll
    /// taken right after completion may report nothing for it. That must not
    /// regress an already-observed `Active` status back down to `Unknown`:
    /// the retry loop keeps polling (RUNNING is non-terminal) until the
    /// budget is exhausted, and the job is absent from the second poll.
    #[tokio::test]
    async fn update_leaves_status_unchanged_for_a_name_absent_from_a_later_poll() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![ok(""), ok("s1 RUNNING"), ok("")]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        )
        .with_retry_policy(1, Duration::from_millis(1));

        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        launcher.launch(&[step]).await.unwrap();

        launcher.update().await.unwrap();
        assert_eq!(launcher.report("s1"), TaskStatus::Active);
    }

    #[tokio::test]
    async fn update_gives_up_after_exhausting_retries() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![
                ok(""),
                Err(TransientProbeError::Failed("a".into())),
                Err(TransientProbeError::Failed("b".into())),
            ]),
        };
        let mut launcher = BatchLauncher::new(
            runner,
            SqueueBuilder,
            FlagStyleParameterizer::new().register("roms", "roms_exe"),
        )
        .with_retry_policy(1, Duration::from_millis(1));

        let step = Step::new("s1", "roms", "b.yaml").unwrap();
        launcher.launch(&[step]).await.unwrap();
        assert!(launcher.update().await.is_err());
    }
}
