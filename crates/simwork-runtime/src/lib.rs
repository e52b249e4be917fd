//! Concrete backends and the control loops built on top of `simwork-kernel`'s
//! contracts: a local-process launcher, a batch-scheduler launcher, the
//! orchestrator run loop, and the long-lived service controller.

pub mod batch_launcher;
pub mod local_launcher;
pub mod orchestrator;
pub mod service;

pub use batch_launcher::{BatchCommandBuilder, BatchLauncher};
pub use local_launcher::LocalLauncher;
pub use orchestrator::{Orchestrator, OrchestratorError, RunReport, StepRef};
pub use service::{HealthClock, Service, ServiceConfiguration, ServiceController};
