//! Dependency DAG construction (§3 "DAG"), shared by every [`crate::planner::Planner`]
//! implementation.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ValidationError;
use crate::model::Workplan;

/// Fixed entry node. Never handed to a Launcher.
pub const START: &str = "__start__";
/// Fixed exit node. Never handed to a Launcher.
pub const TERM: &str = "__term__";

/// What kind of node a DAG node is. Launchers ignore everything but `Step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    Term,
    Step,
    /// A sibling of a `Step` node woven in by [`crate::planner::MonitoredPlanner`];
    /// surfaced for observability but never launched.
    Monitor,
}

/// The dependency graph derived from a [`Workplan`].
///
/// Stores adjacency as `BTreeMap`s so iteration — and therefore every
/// lexicographic tie-break in the planners built on top — is deterministic
/// without an extra sort pass.
#[derive(Debug, Clone)]
pub struct Dag {
    pub(crate) kinds: BTreeMap<String, NodeKind>,
    /// predecessor -> successors
    pub(crate) edges: BTreeMap<String, BTreeSet<String>>,
    /// successor -> predecessors (kept in sync with `edges`)
    pub(crate) reverse: BTreeMap<String, BTreeSet<String>>,
}

impl Dag {
    /// Build the DAG for a workplan: one node per step plus `START`/`TERM`,
    /// `START -> n` for every step with no unresolved dependency, `n -> TERM`
    /// for every step with no successor, `m -> n` for every `m` in
    /// `n.depends_on`. Duplicate edges are coalesced by construction (`BTreeSet`).
    pub fn from_workplan(plan: &Workplan) -> Result<Self, ValidationError> {
        plan.validate()?;

        let mut dag = Self {
            kinds: BTreeMap::new(),
            edges: BTreeMap::new(),
            reverse: BTreeMap::new(),
        };

        dag.kinds.insert(START.to_string(), NodeKind::Start);
        dag.kinds.insert(TERM.to_string(), NodeKind::Term);
        for step in &plan.steps {
            dag.kinds.insert(step.name.clone(), NodeKind::Step);
        }

        for step in &plan.steps {
            if step.depends_on.is_empty() {
                dag.add_edge(START, &step.name);
            }
            for dep in &step.depends_on {
                dag.add_edge(dep, &step.name);
            }
        }

        for step in &plan.steps {
            let has_successor = dag.edges.get(&step.name).is_some_and(|s| !s.is_empty());
            if !has_successor {
                dag.add_edge(&step.name, TERM);
            }
        }

        Ok(dag)
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.reverse
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn kind_of(&self, name: &str) -> Option<NodeKind> {
        self.kinds.get(name).copied()
    }

    pub fn successors(&self, name: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    pub fn predecessors(&self, name: &str) -> impl Iterator<Item = &str> {
        self.reverse
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Add a monitor sibling `monitor(n)` with edge `n -> monitor(n)` for
    /// every non-control node. Used by [`crate::planner::MonitoredPlanner`].
    pub fn with_monitors(mut self) -> Self {
        let step_nodes: Vec<String> = self
            .kinds
            .iter()
            .filter(|(_, k)| matches!(k, NodeKind::Step))
            .map(|(n, _)| n.clone())
            .collect();

        for node in step_nodes {
            let monitor_name = format!("{node}.monitor");
            self.kinds.insert(monitor_name.clone(), NodeKind::Monitor);
            self.add_edge(&node, &monitor_name);
        }
        self
    }

    /// Breadth-first traversal starting at `START`, with lexicographic
    /// tie-break among equally-ready (same-frontier) nodes. Control nodes are
    /// included in the raw order; callers typically filter them out.
    pub fn bfs_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut frontier = vec![START.to_string()];
        visited.insert(START.to_string());

        while !frontier.is_empty() {
            order.extend(frontier.iter().cloned());
            let mut next_frontier: BTreeSet<String> = BTreeSet::new();
            for node in &frontier {
                for succ in self.successors(node) {
                    if visited.insert(succ.to_string()) {
                        next_frontier.insert(succ.to_string());
                    }
                }
            }
            frontier = next_frontier.into_iter().collect();
        }

        order
    }

    pub fn node_count(&self) -> usize {
        self.kinds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Step, WorkplanState};

    fn plan_with(steps: Vec<Step>) -> Workplan {
        Workplan {
            name: "w".into(),
            description: "d".into(),
            state: WorkplanState::Draft,
            steps,
            compute_environment: Default::default(),
            runtime_vars: Vec::new(),
        }
    }

    #[test]
    fn empty_steps_is_rejected() {
        let plan = plan_with(vec![]);
        assert!(matches!(
            Dag::from_workplan(&plan),
            Err(ValidationError::EmptyWorkplan)
        ));
    }

    #[test]
    fn single_step_links_start_and_term() {
        let plan = plan_with(vec![Step::new("s", "sleep", "b.yaml").unwrap()]);
        let dag = Dag::from_workplan(&plan).unwrap();
        assert!(dag.successors(START).any(|n| n == "s"));
        assert!(dag.successors("s").any(|n| n == TERM));
    }

    #[test]
    fn cycle_is_rejected() {
        let a = Step::new("a", "sleep", "b.yaml").unwrap().depends_on(["b"]);
        let b = Step::new("b", "sleep", "b.yaml").unwrap().depends_on(["a"]);
        let plan = plan_with(vec![a, b]);
        assert!(matches!(
            Dag::from_workplan(&plan),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn diamond_bfs_order_is_lexicographic_per_frontier() {
        let a = Step::new("A", "sleep", "b.yaml").unwrap();
        let b = Step::new("B", "sleep", "b.yaml").unwrap().depends_on(["A"]);
        let c = Step::new("C", "sleep", "b.yaml").unwrap().depends_on(["A"]);
        let d = Step::new("D", "sleep", "b.yaml")
            .unwrap()
            .depends_on(["B", "C"]);
        let plan = plan_with(vec![a, b, c, d]);
        let dag = Dag::from_workplan(&plan).unwrap();
        let order: Vec<String> = dag
            .bfs_order()
            .into_iter()
            .filter(|n| n != START && n != TERM)
            .collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }
}
