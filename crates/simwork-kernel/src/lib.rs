//! Trait and type contracts for the workplan orchestration engine.
//!
//! This crate holds no I/O: no process spawning, no file reads, no network
//! calls. It defines *what* a launcher, a planner, and a task are, so that
//! `simwork-runtime` can provide concrete backends against a stable
//! interface and tests can substitute fakes without depending on the real
//! implementations at all.

pub mod dag;
pub mod error;
pub mod launcher;
pub mod model;
pub mod param;
pub mod planner;
pub mod status;
pub mod task;

pub use dag::Dag;
pub use error::{AllocationError, LaunchError, TransientProbeError, ValidationError};
pub use launcher::{CommandOutput, CommandRunner, Launcher};
pub use model::{KeyValueStore, ProcessHandle, Step, Workplan, WorkplanState};
pub use param::{CommandParameterizer, FlagStyleParameterizer, ParameterizedCommand};
pub use planner::{GraphPlanner, MonitoredPlanner, Planner, SerialPlanner};
pub use status::TaskStatus;
pub use task::{FailTask, Task, TaskSource};
