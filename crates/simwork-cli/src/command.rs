//! Handlers for each CLI subcommand.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use simwork_kernel::{Dag, FlagStyleParameterizer, GraphPlanner, Step, Workplan};
use simwork_runtime::{LocalLauncher, Orchestrator};
use tracing::info;

use crate::document::{load_blueprint, load_workplan, BlueprintDocument};

/// Expand any step whose application has a registered splitter into its
/// chain of calendar-sliced sub-steps, by loading that step's own blueprint
/// document for the start/end dates the splitter needs. A step with no
/// registered splitter — or whose blueprint carries no `runtime_params` —
/// passes through unchanged.
///
/// Runs once, before the [`Dag`] is built: splitting is an upfront expansion
/// of the plan, not something steps do to themselves while a run is already
/// in flight.
fn expand_splittable_steps(plan: &mut Workplan) -> Result<()> {
    if !plan.steps.iter().any(|s| simwork_splitter::splitter_for(&s.application).is_some()) {
        return Ok(());
    }

    let mut expanded = Vec::with_capacity(plan.steps.len());
    for step in plan.steps.drain(..) {
        if simwork_splitter::splitter_for(&step.application).is_none() {
            expanded.push(step);
            continue;
        }

        let blueprint_path = Path::new(&step.blueprint);
        let doc: BlueprintDocument = load_blueprint(blueprint_path)
            .with_context(|| format!("loading blueprint for splittable step `{}`", step.name))?;
        let Some(runtime_params) = doc.runtime_params else {
            expanded.push(step);
            continue;
        };

        let mut step = step;
        if let Some(output_dir) = runtime_params.output_dir {
            step.blueprint_overrides
                .insert(simwork_splitter::OUTPUT_DIR_KEY.to_string(), output_dir);
        }
        let chunks = simwork_splitter::expand_step(
            &step,
            runtime_params.start_date,
            runtime_params.end_date,
        )
        .with_context(|| format!("splitting step `{}` into calendar slices", step.name))?;
        expanded.extend(chunks);
    }
    plan.steps = expanded;
    Ok(())
}

/// Build a command parameterizer from a workplan's `compute_environment`:
/// an `executable.<application>` key overrides the default of using the
/// application tag itself as the executable name (so a smoke-test workplan
/// that just runs `sleep`/`true` needs no configuration at all).
fn parameterizer_for(plan: &Workplan) -> FlagStyleParameterizer {
    let applications: BTreeSet<&str> = plan.steps.iter().map(|s| s.application.as_str()).collect();
    let mut parameterizer = FlagStyleParameterizer::new();
    for application in applications {
        let key = format!("executable.{application}");
        let executable = plan
            .compute_environment
            .get(&key)
            .cloned()
            .unwrap_or_else(|| application.to_string());
        parameterizer = parameterizer.register(application, executable);
    }
    parameterizer
}

pub fn check_workplan(path: &Path) -> Result<()> {
    let mut plan = load_workplan(path)?;
    expand_splittable_steps(&mut plan)?;
    plan.validate().context("workplan failed validation")?;
    println!(
        "workplan `{}` is valid: {} step(s)",
        plan.name,
        plan.steps.len()
    );
    Ok(())
}

pub fn plan_workplan(path: &Path) -> Result<()> {
    let mut plan = load_workplan(path)?;
    expand_splittable_steps(&mut plan)?;
    let dag = Dag::from_workplan(&plan)?;
    let mut planner = GraphPlanner::new(dag);

    let mut tier = 0;
    loop {
        let batch = planner.ready_batch();
        if batch.is_empty() {
            break;
        }
        println!("tier {tier}: {}", batch.join(", "));
        for name in &batch {
            planner.remove(name)?;
            planner.mark_satisfied(name);
        }
        tier += 1;
    }

    if !planner.is_exhausted() {
        println!(
            "warning: {} step(s) never became ready (a dependency is missing or cyclic elsewhere)",
            plan.steps.len() - tier
        );
    }
    Ok(())
}

pub async fn run_workplan(path: &Path, poll_interval: Duration) -> Result<()> {
    let mut plan = load_workplan(path)?;
    expand_splittable_steps(&mut plan)?;
    plan.validate().context("workplan failed validation")?;

    let dag = Dag::from_workplan(&plan)?;
    let planner = GraphPlanner::new(dag);
    let launcher = LocalLauncher::new(parameterizer_for(&plan));
    let mut orchestrator = Orchestrator::new(&plan, planner, launcher, poll_interval);

    info!(workplan = %plan.name, steps = plan.steps.len(), "starting run");
    let report = orchestrator.run().await?;

    println!("succeeded: {:?}", report.succeeded);
    if !report.failed.is_empty() {
        println!("failed: {:?}", report.failed);
    }
    if !report.aborted.is_empty() {
        println!("aborted: {:?}", report.aborted);
    }
    if !report.failed.is_empty() || !report.aborted.is_empty() {
        anyhow::bail!("workplan did not complete cleanly");
    }
    Ok(())
}

fn blueprint_as_single_step_plan(path: &Path) -> Result<Workplan> {
    let doc = load_blueprint(path)?;
    let step = Step::new(
        doc.name.unwrap_or_else(|| "blueprint".to_string()),
        doc.application,
        path.to_string_lossy().to_string(),
    )?;
    Ok(Workplan {
        name: step.name.clone(),
        description: format!("single-step run of blueprint {}", path.display()),
        state: simwork_kernel::WorkplanState::Draft,
        steps: vec![step],
        compute_environment: Default::default(),
        runtime_vars: Vec::new(),
    })
}

pub fn check_blueprint(path: &Path) -> Result<()> {
    let mut plan = blueprint_as_single_step_plan(path)?;
    expand_splittable_steps(&mut plan)?;
    plan.validate().context("blueprint failed validation")?;
    println!(
        "blueprint `{}` is valid (application: {})",
        plan.name, plan.steps[0].application
    );
    Ok(())
}

pub async fn run_blueprint(path: &Path, poll_interval: Duration) -> Result<()> {
    let mut plan = blueprint_as_single_step_plan(path)?;
    expand_splittable_steps(&mut plan)?;
    plan.validate().context("blueprint failed validation")?;

    let dag = Dag::from_workplan(&plan)?;
    let planner = GraphPlanner::new(dag);
    let launcher = LocalLauncher::new(parameterizer_for(&plan));
    let mut orchestrator = Orchestrator::new(&plan, planner, launcher, poll_interval);

    let report = orchestrator.run().await?;
    println!("succeeded: {:?}", report.succeeded);
    if !report.failed.is_empty() || !report.aborted.is_empty() {
        anyhow::bail!("blueprint run did not complete cleanly");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn check_workplan_accepts_a_valid_document() {
        let (_dir, path) = write_temp_yaml(
            r#"
name: smoke-test
description: a minimal two-step plan
state: Draft
steps:
  - name: first
    application: sleep
    blueprint: b.yaml
  - name: second
    application: sleep
    blueprint: b.yaml
    depends_on: [first]
"#,
        );
        check_workplan(&path).unwrap();
    }

    #[test]
    fn check_workplan_rejects_a_cycle() {
        let (_dir, path) = write_temp_yaml(
            r#"
name: broken
description: a plan with a dependency cycle
state: Draft
steps:
  - name: a
    application: sleep
    blueprint: b.yaml
    depends_on: [b]
  - name: b
    application: sleep
    blueprint: b.yaml
    depends_on: [a]
"#,
        );
        assert!(check_workplan(&path).is_err());
    }

    #[test]
    fn check_blueprint_accepts_a_minimal_document() {
        let (_dir, path) = write_temp_yaml(
            r#"
application: roms_marbl
name: ocean-case
"#,
        );
        check_blueprint(&path).unwrap();
    }

    #[tokio::test]
    async fn run_workplan_executes_a_two_step_chain() {
        let (_dir, path) = write_temp_yaml(
            r#"
name: smoke-test
description: a minimal two-step plan
state: Draft
steps:
  - name: first
    application: true
    blueprint: b.yaml
  - name: second
    application: true
    blueprint: b.yaml
    depends_on: [first]
compute_environment:
  executable.true: "true"
"#,
        );
        run_workplan(&path, Duration::from_millis(20)).await.unwrap();
    }

    #[test]
    fn plan_workplan_expands_a_splittable_step_into_calendar_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let blueprint_path = dir.path().join("ocean.yaml");
        std::fs::write(
            &blueprint_path,
            r#"
application: roms_marbl
name: ocean-run
runtime_params:
  start_date: 2020-01-01
  end_date: 2020-03-01
  output_dir: /scratch/ocean-run
"#,
        )
        .unwrap();

        let workplan_path = dir.path().join("plan.yaml");
        std::fs::write(
            &workplan_path,
            format!(
                r#"
name: seasonal-run
description: a single splittable step
state: Draft
steps:
  - name: ocean-run
    application: roms_marbl
    blueprint: {}
"#,
                blueprint_path.display()
            ),
        )
        .unwrap();

        let mut plan = load_workplan(&workplan_path).unwrap();
        expand_splittable_steps(&mut plan).unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].name, "ocean-run_2020:01:01-2020:02:01");
        assert_eq!(plan.steps[1].name, "ocean-run_2020:02:01-2020:03:01");
        assert!(plan.steps[1].depends_on.contains(&plan.steps[0].name));
        plan.validate().unwrap();
    }

    #[test]
    fn plan_workplan_leaves_unsplittable_steps_untouched() {
        let (_dir, path) = write_temp_yaml(
            r#"
name: smoke-test
description: nothing to split here
state: Draft
steps:
  - name: first
    application: sleep
    blueprint: b.yaml
"#,
        );
        let mut plan = load_workplan(&path).unwrap();
        expand_splittable_steps(&mut plan).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].name, "first");
    }
}
