//! Iteration order over a [`Dag`] (§4.1).
//!
//! A `Planner` hands the Orchestrator one step name at a time. Implementations
//! differ only in *how* the order is produced and whether it reacts to
//! completion as it goes — the contract callers rely on is just `next`/`remove`.

use std::collections::{BTreeSet, VecDeque};

use crate::dag::{Dag, NodeKind, START, TERM};
use crate::error::ValidationError;

/// Hands out step names to the Orchestrator, one readiness check at a time.
///
/// `next()` peeks without consuming; `remove(name)` drops a step once its
/// task has reached a terminal status, which is what unblocks planners that
/// do track live readiness. Implementations that don't (see
/// [`SerialPlanner`]) still require the call — it is how the Orchestrator
/// signals "done with this one", independent of whether the planner uses it.
pub trait Planner {
    /// Next step name ready to be handed to a Launcher, if any remain.
    fn next(&mut self) -> Option<String>;

    /// Remove a step from further consideration. Errors if `name` was never
    /// part of this planner's DAG, or was already removed.
    fn remove(&mut self, name: &str) -> Result<(), ValidationError>;

    /// All step names this planner was constructed with, in DAG node order
    /// (control nodes excluded), for reporting/diagnostics.
    fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    /// True once every step has been removed.
    fn is_exhausted(&self) -> bool;

    /// Every step currently eligible to launch, not just the first. The
    /// Orchestrator dispatches this whole batch each tick rather than
    /// re-calling `next()` in a loop, so independent ready steps (e.g. two
    /// siblings in a diamond) start together instead of one at a time.
    ///
    /// Default implementation falls back to the single-item behavior of
    /// `next()`; [`GraphPlanner`] overrides it to return every ready step.
    fn ready_batch(&mut self) -> Vec<String> {
        self.next().into_iter().collect()
    }

    /// Record that `name` completed with a successful (`Done`) outcome.
    /// Planners that don't track live readiness (e.g. [`SerialPlanner`])
    /// ignore this; [`GraphPlanner`] uses it to unblock dependents.
    fn mark_satisfied(&mut self, name: &str) {
        let _ = name;
    }
}

/// Precomputes a single BFS snapshot over the DAG at construction time and
/// serves it back in that fixed order, regardless of what has completed.
///
/// This intentionally does *not* re-check live dependency completion on
/// `next()` — a step earlier in program order than its own dependency can
/// appear before that dependency in the returned sequence. Callers that need
/// dependency-respecting iteration should use [`GraphPlanner`] instead.
pub struct SerialPlanner {
    order: VecDeque<String>,
    all: Vec<String>,
    removed: BTreeSet<String>,
}

impl SerialPlanner {
    pub fn new(dag: &Dag) -> Self {
        let all: Vec<String> = dag
            .bfs_order()
            .into_iter()
            .filter(|n| n != START && n != TERM)
            .collect();
        Self {
            order: all.iter().cloned().collect(),
            all,
            removed: BTreeSet::new(),
        }
    }
}

impl Planner for SerialPlanner {
    fn next(&mut self) -> Option<String> {
        self.order.front().cloned()
    }

    fn remove(&mut self, name: &str) -> Result<(), ValidationError> {
        if self.removed.contains(name) {
            return Err(ValidationError::AlreadyRemoved(name.to_string()));
        }
        let pos = self
            .order
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ValidationError::UnknownStep(name.to_string()))?;
        self.order.remove(pos);
        self.removed.insert(name.to_string());
        Ok(())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.all.iter().map(String::as_str))
    }

    fn is_exhausted(&self) -> bool {
        self.order.is_empty()
    }
}

/// Dependency-aware planner: a step is only offered once every predecessor
/// in the DAG has been marked [`GraphPlanner::mark_satisfied`] — completed
/// with `Done`, specifically, not merely retired. A predecessor that ends in
/// `Aborted`/`Failed` is `remove`d from consideration but never satisfied,
/// so its dependents are withheld forever; the Orchestrator surfaces that as
/// a stalled run rather than silently running a step whose input never
/// materialized.
pub struct GraphPlanner {
    dag: Dag,
    all: Vec<String>,
    removed: BTreeSet<String>,
    satisfied: BTreeSet<String>,
}

impl GraphPlanner {
    pub fn new(dag: Dag) -> Self {
        let all: Vec<String> = dag
            .bfs_order()
            .into_iter()
            .filter(|n| n != START && n != TERM)
            .collect();
        Self {
            dag,
            all,
            removed: BTreeSet::new(),
            satisfied: BTreeSet::new(),
        }
    }

    fn is_ready(&self, name: &str) -> bool {
        self.dag
            .predecessors(name)
            .all(|p| p == START || self.satisfied.contains(p))
    }

    /// Record that `name` completed successfully, unblocking dependents
    /// whose only remaining unmet predecessor was `name`. A no-op if `name`
    /// was never part of this planner.
    pub fn mark_satisfied(&mut self, name: &str) {
        if self.all.iter().any(|n| n == name) {
            self.satisfied.insert(name.to_string());
        }
    }
}

impl Planner for GraphPlanner {
    fn next(&mut self) -> Option<String> {
        self.all
            .iter()
            .find(|n| !self.removed.contains(n.as_str()) && self.is_ready(n))
            .cloned()
    }

    fn remove(&mut self, name: &str) -> Result<(), ValidationError> {
        if !self.all.iter().any(|n| n == name) {
            return Err(ValidationError::UnknownStep(name.to_string()));
        }
        if !self.removed.insert(name.to_string()) {
            return Err(ValidationError::AlreadyRemoved(name.to_string()));
        }
        Ok(())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.all.iter().map(String::as_str))
    }

    fn is_exhausted(&self) -> bool {
        self.removed.len() == self.all.len()
    }

    fn ready_batch(&mut self) -> Vec<String> {
        self.all
            .iter()
            .filter(|n| !self.removed.contains(n.as_str()) && self.is_ready(n))
            .cloned()
            .collect()
    }

    fn mark_satisfied(&mut self, name: &str) {
        GraphPlanner::mark_satisfied(self, name)
    }
}

/// Wraps another planner, also walking the `.monitor` siblings woven in by
/// [`Dag::with_monitors`] so the Orchestrator can surface monitor-only nodes
/// in diagnostics without a Launcher ever seeing them.
pub struct MonitoredPlanner<P> {
    inner: P,
    monitors: Vec<String>,
}

impl<P: Planner> MonitoredPlanner<P> {
    pub fn new(inner: P, dag: &Dag) -> Self {
        let monitors: Vec<String> = dag
            .bfs_order()
            .into_iter()
            .filter(|n| dag.kind_of(n) == Some(NodeKind::Monitor))
            .collect();
        Self { inner, monitors }
    }

    pub fn monitor_names(&self) -> impl Iterator<Item = &str> {
        self.monitors.iter().map(String::as_str)
    }
}

impl<P: Planner> Planner for MonitoredPlanner<P> {
    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }

    fn remove(&mut self, name: &str) -> Result<(), ValidationError> {
        self.inner.remove(name)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        self.inner.iter()
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn ready_batch(&mut self) -> Vec<String> {
        self.inner.ready_batch()
    }

    fn mark_satisfied(&mut self, name: &str) {
        self.inner.mark_satisfied(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Step, Workplan, WorkplanState};

    fn diamond() -> Dag {
        let a = Step::new("task-a", "sleep", "b.yaml").unwrap();
        let b = Step::new("task-b", "sleep", "b.yaml")
            .unwrap()
            .depends_on(["task-a"]);
        let c = Step::new("task-c", "sleep", "b.yaml")
            .unwrap()
            .depends_on(["task-a"]);
        let d = Step::new("task-d", "sleep", "b.yaml")
            .unwrap()
            .depends_on(["task-b", "task-c"]);
        let plan = Workplan {
            name: "w".into(),
            description: "d".into(),
            state: WorkplanState::Draft,
            steps: vec![a, b, c, d],
            compute_environment: Default::default(),
            runtime_vars: Vec::new(),
        };
        Dag::from_workplan(&plan).unwrap()
    }

    #[test]
    fn serial_planner_order_is_not_dependency_aware() {
        // Mirrors the upstream fixture: task-d's dependency (task-b / task-c)
        // can sit later in the fixed BFS snapshot than a step that depends on it,
        // because SerialPlanner never re-evaluates readiness.
        let dag = diamond();
        let planner = SerialPlanner::new(&dag);
        let order: Vec<&str> = planner.iter().collect();
        assert_eq!(order, vec!["task-a", "task-b", "task-c", "task-d"]);
    }

    #[test]
    fn graph_planner_withholds_step_until_dependencies_removed() {
        let dag = diamond();
        let mut planner = GraphPlanner::new(dag);

        assert_eq!(planner.next().as_deref(), Some("task-a"));
        planner.remove("task-a").unwrap();
        planner.mark_satisfied("task-a");

        // task-b and task-c are both now ready; lexicographically task-b first.
        assert_eq!(planner.next().as_deref(), Some("task-b"));
        // task-d must not be offered until both task-b and task-c are removed.
        planner.remove("task-b").unwrap();
        planner.mark_satisfied("task-b");
        assert_eq!(planner.next().as_deref(), Some("task-c"));
        planner.remove("task-c").unwrap();
        planner.mark_satisfied("task-c");

        assert_eq!(planner.next().as_deref(), Some("task-d"));
        planner.remove("task-d").unwrap();
        planner.mark_satisfied("task-d");
        assert!(planner.is_exhausted());
    }

    #[test]
    fn ready_batch_returns_all_siblings_at_once() {
        let dag = diamond();
        let mut planner = GraphPlanner::new(dag);
        assert_eq!(planner.ready_batch(), vec!["task-a"]);
        planner.remove("task-a").unwrap();
        planner.mark_satisfied("task-a");
        assert_eq!(planner.ready_batch(), vec!["task-b", "task-c"]);
    }

    #[test]
    fn failed_predecessor_permanently_withholds_dependents() {
        let dag = diamond();
        let mut planner = GraphPlanner::new(dag);
        // task-a fails: removed from consideration, but never satisfied.
        planner.remove("task-a").unwrap();
        assert!(planner.ready_batch().is_empty());
        assert!(!planner.is_exhausted());
    }

    #[test]
    fn removing_unknown_step_errors() {
        let dag = diamond();
        let mut planner = GraphPlanner::new(dag);
        assert!(matches!(
            planner.remove("nope"),
            Err(ValidationError::UnknownStep(_))
        ));
    }

    #[test]
    fn removing_twice_errors() {
        let dag = diamond();
        let mut planner = GraphPlanner::new(dag);
        planner.remove("task-a").unwrap();
        assert!(matches!(
            planner.remove("task-a"),
            Err(ValidationError::AlreadyRemoved(_))
        ));
    }
}
