//! Loading workplan and blueprint YAML documents from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use simwork_kernel::Workplan;

pub fn load_workplan(path: &Path) -> Result<Workplan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading workplan document at {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing workplan document at {}", path.display()))
}

/// The slice of a blueprint's `runtime_params` the splitter needs to know the
/// span it's expanding. Absent for applications with no registered splitter,
/// so a plain smoke-test blueprint needs no `runtime_params` section at all.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeParams {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// A single-application blueprint document. The reference format carries a
/// large nested configuration (grid, forcing, code repositories, ...) that
/// is opaque to the orchestration core; only the fields below drive how the
/// CLI turns it into a runnable step.
#[derive(Debug, Clone, Deserialize)]
pub struct BlueprintDocument {
    pub application: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runtime_params: Option<RuntimeParams>,
}

pub fn load_blueprint(path: &Path) -> Result<BlueprintDocument> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading blueprint document at {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing blueprint document at {}", path.display()))
}
