//! The declarative data model: [`Step`], [`Workplan`], and the handful of
//! small value types the rest of the engine is built around.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A flat key→scalar override map, consumed by the command parameterizer.
///
/// `BTreeMap` (rather than `HashMap`) so iteration order — and therefore CLI
/// flag order — is deterministic across runs, which matters for log
/// reproducibility and for tests that assert on emitted command lines.
pub type KeyValueStore = BTreeMap<String, String>;

/// One unit of execution within a [`Workplan`]. Immutable once constructed —
/// all fields are set at construction and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the owning workplan; non-empty.
    pub name: String,
    /// Tag selecting an executable template and, optionally, a step splitter.
    pub application: String,
    /// Path to a validated blueprint document (opaque to the core).
    pub blueprint: String,
    /// Names of steps that must reach `Done` before this step may start.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub blueprint_overrides: KeyValueStore,
    #[serde(default)]
    pub compute_overrides: KeyValueStore,
    #[serde(default)]
    pub workflow_overrides: KeyValueStore,
}

impl Step {
    /// Construct a step, rejecting an empty name up front.
    pub fn new(
        name: impl Into<String>,
        application: impl Into<String>,
        blueprint: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyStepName);
        }
        Ok(Self {
            name,
            application: application.into(),
            blueprint: blueprint.into(),
            depends_on: BTreeSet::new(),
            blueprint_overrides: KeyValueStore::new(),
            compute_overrides: KeyValueStore::new(),
            workflow_overrides: KeyValueStore::new(),
        })
    }

    /// Builder-style dependency addition, for tests and programmatic plan
    /// construction.
    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Validation state of a [`Workplan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkplanState {
    Draft,
    Validated,
}

/// A named, ordered collection of inter-dependent [`Step`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workplan {
    pub name: String,
    pub description: String,
    pub state: WorkplanState,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub compute_environment: KeyValueStore,
    #[serde(default)]
    pub runtime_vars: Vec<String>,
}

impl Workplan {
    /// Validate structural invariants from §3: non-empty, unique step names,
    /// every dependency resolves to a step in the same plan, no cycles.
    ///
    /// Does not mutate `state` — callers that want a `Validated` plan should
    /// do so explicitly once this returns `Ok`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyWorkplan);
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(ValidationError::EmptyStepName);
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ValidationError::DuplicateStepName(step.name.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ValidationError::UnknownDependency(
                        step.name.clone(),
                        dep.clone(),
                    ));
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), ValidationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let by_name: BTreeMap<&str, &Step> =
            self.steps.iter().map(|s| (s.name.as_str(), s)).collect();

        // Iterative DFS to avoid recursion-depth concerns on pathological inputs.
        for root in by_name.keys() {
            if marks.contains_key(root) {
                continue;
            }
            let mut stack: Vec<(&str, std::collections::btree_set::Iter<'_, String>)> =
                vec![(root, by_name[root].depends_on.iter())];
            marks.insert(root, Mark::Active);

            while let Some((node, mut deps)) = stack.pop() {
                if let Some(dep) = deps.next() {
                    stack.push((node, deps));
                    match marks.get(dep.as_str()) {
                        Some(Mark::Active) => return Err(ValidationError::Cycle(dep.clone())),
                        Some(Mark::Done) => continue,
                        None => {
                            marks.insert(dep.as_str(), Mark::Active);
                            stack.push((dep.as_str(), by_name[dep.as_str()].depends_on.iter()));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }

        Ok(())
    }
}

/// A stable pointer to an OS process, used to reattach a [`crate::task::Task`]
/// across a restart of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Process creation timestamp, in whatever monotonic/epoch unit the
    /// launcher's process inspector reports (µs since epoch here).
    pub created_on: i64,
    pub name: String,
    pub key: uuid::Uuid,
}
