//! Local-process [`Launcher`]: every step becomes a direct child process of
//! the controller, tracked through a [`Task`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use simwork_kernel::{
    AllocationError, CommandParameterizer, FailTask, LaunchError, Launcher, ProcessHandle, Step,
    Task, TaskSource, TaskStatus, TransientProbeError,
};
use tracing::{info, warn};

pub struct LocalLauncher {
    parameterizer: Arc<dyn CommandParameterizer>,
    /// Directory each task's `<slug(name)>.log` is written under (§6 "Process
    /// log files"). Defaults to the process's current directory.
    log_dir: PathBuf,
    tasks: BTreeMap<String, Task>,
}

impl LocalLauncher {
    pub fn new(parameterizer: impl CommandParameterizer + 'static) -> Self {
        Self::with_log_dir(parameterizer, Path::new("."))
    }

    pub fn with_log_dir(parameterizer: impl CommandParameterizer + 'static, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            parameterizer: Arc::new(parameterizer),
            log_dir: log_dir.into(),
            tasks: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    /// Local processes need no reservation step.
    async fn allocate(&mut self, _steps: &[Step]) -> Result<(), AllocationError> {
        Ok(())
    }

    async fn launch(&mut self, steps: &[Step]) -> Result<Vec<FailTask>, LaunchError> {
        let mut failures = Vec::new();
        for step in steps {
            let cmd = match self.parameterizer.parameterize(step) {
                Ok(cmd) => cmd,
                Err(err) => {
                    warn!(step = %step.name, error = %err, "failed to parameterize step");
                    failures.push(FailTask::new(&step.name, err.to_string()));
                    continue;
                }
            };

            let mut task = Task::new(TaskSource::Step(step.clone()));
            match task.start(cmd, &self.log_dir) {
                Ok(()) => {
                    info!(step = %step.name, pid = task.pid(), "started local task");
                    self.tasks.insert(step.name.clone(), task);
                }
                Err(err) => {
                    warn!(step = %step.name, error = %err, "failed to start local task");
                    failures.push(FailTask::new(&step.name, err.to_string()));
                }
            }
        }
        Ok(failures)
    }

    fn add_monitored(&mut self, name: String, handle: ProcessHandle) {
        self.tasks.insert(name, Task::reattach(handle));
    }

    fn report(&self, name: &str) -> TaskStatus {
        self.tasks
            .get(name)
            .map(Task::status)
            .unwrap_or(TaskStatus::Unknown)
    }

    async fn update(&mut self) -> Result<(), TransientProbeError> {
        for (name, task) in self.tasks.iter_mut() {
            let before = task.status();
            let after = task.query();
            if before != after {
                tracing::debug!(step = %name, from = %before, to = %after, rc = task.rc(), "task status transition");
            }
        }
        Ok(())
    }

    fn active_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| !t.status().is_terminal())
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn cancel(&mut self, name: &str) -> TaskStatus {
        match self.tasks.get_mut(name) {
            Some(task) => task.cancel(),
            None => TaskStatus::Unknown,
        }
    }

    fn snapshot_handles(&self) -> BTreeMap<String, ProcessHandle> {
        self.tasks
            .iter()
            .filter_map(|(name, task)| {
                task.to_process_handle(name.clone())
                    .map(|handle| (name.clone(), handle))
            })
            .collect()
    }
}
