//! Dependency graph over unresolved dependencies.
//!
//! Design:
//! - Forward edges: task -> dependencies it still waits for
//! - Reverse edges: task -> tasks waiting for it
//! - Invariant: edges and reverse_edges are kept in sync
//!
//! Only *unresolved* dependencies live here. A dependency that completed is
//! removed from the graph; one that was already complete when the dependent
//! was submitted never enters it. Since a dependency must be registered
//! before its dependent is submitted, the graph cannot contain cycles.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Enables O(1) lookup of "who is waiting for this task?"
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` waits for `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.reverse_edges
            .entry(depends_on.clone())
            .or_default()
            .insert(task.clone());
        self.edges.entry(task).or_default().insert(depends_on);
    }

    /// `task` no longer waits for `depends_on` (it completed).
    pub fn remove_dependency(&mut self, task: &TaskId, depends_on: &TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task.clone()) {
            e.get_mut().remove(depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on.clone()) {
            e.get_mut().remove(task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every forward edge of `task` (it reached a terminal state without
    /// its dependencies resolving).
    pub fn remove_task(&mut self, task: &TaskId) {
        for dep in self.get_dependencies(task) {
            self.remove_dependency(task, &dep);
        }
    }

    /// Tasks waiting for `task`, whether or not they wait for others too.
    pub fn get_waiting_tasks(&self, task: &TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(task)
            .map(|waiting| waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_dependencies(&self, task: &TaskId) -> bool {
        self.edges
            .get(task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    pub fn get_dependencies(&self, task: &TaskId) -> Vec<TaskId> {
        self.edges
            .get(task)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(!graph.has_dependencies(&id("a")));
        assert!(graph.get_waiting_tasks(&id("a")).is_empty());
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id("b"), id("a")); // B waits for A

        assert!(graph.has_dependencies(&id("b")));
        assert!(!graph.has_dependencies(&id("a")));
        assert_eq!(graph.get_dependencies(&id("b")), vec![id("a")]);
        assert_eq!(graph.get_waiting_tasks(&id("a")), vec![id("b")]);
    }

    #[test]
    fn remove_dependency_removes_both_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id("b"), id("a"));
        graph.remove_dependency(&id("b"), &id("a"));

        assert!(!graph.has_dependencies(&id("b")));
        assert!(graph.get_waiting_tasks(&id("a")).is_empty());
    }

    #[test]
    fn resolving_one_of_two_dependencies_keeps_task_blocked() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id("c"), id("a"));
        graph.add_dependency(id("c"), id("b"));

        graph.remove_dependency(&id("c"), &id("a"));

        assert!(graph.has_dependencies(&id("c")));
        assert_eq!(graph.get_dependencies(&id("c")), vec![id("b")]);
    }

    #[test]
    fn remove_task_detaches_it_from_every_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id("c"), id("a"));
        graph.add_dependency(id("c"), id("b"));
        graph.add_dependency(id("d"), id("a"));

        graph.remove_task(&id("c"));

        assert!(!graph.has_dependencies(&id("c")));
        assert_eq!(graph.get_waiting_tasks(&id("a")), vec![id("d")]);
        assert!(graph.get_waiting_tasks(&id("b")).is_empty());
    }
}
