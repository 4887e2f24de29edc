//! Project dependency graph
//!
//! An adjacency map keyed by project name, used to impose a stable total
//! order on the jobs of a batch. The only consumer is the pipeline's job
//! ordering; there is no general graph machinery here.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle involving projects: {0:?}")]
    Cycle(Vec<String>),
}

/// DAG of project dependencies.
///
/// An edge `a -> b` means `b` depends on `a`: `a` is ordered before `b`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// node -> nodes that depend on it
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a project with no edges. Idempotent.
    pub fn add_project(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
    }

    /// Records that `project` depends on `depends_on`.
    pub fn add_dependency(&mut self, project: &str, depends_on: &str) {
        self.add_project(project);
        self.edges
            .entry(depends_on.to_string())
            .or_default()
            .insert(project.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Stable topological order of all projects.
    ///
    /// Kahn's algorithm with a sorted ready set, so ties between independent
    /// projects break lexicographically by name. Cycles are a configuration
    /// error and refuse the whole sort.
    pub fn sorted(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.edges.keys().map(|n| (n.as_str(), 0)).collect();
        for dependents in self.edges.values() {
            for d in dependents {
                *in_degree.get_mut(d.as_str()).expect("edge to unknown node") += 1;
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(&node) = ready.iter().next() {
            ready.remove(node);
            order.push(node.to_string());

            if let Some(dependents) = self.edges.get(node) {
                for d in dependents {
                    let deg = in_degree.get_mut(d.as_str()).expect("edge to unknown node");
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(d.as_str());
                    }
                }
            }
        }

        if order.len() != self.edges.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_respects_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("b", "a");
        graph.add_dependency("c", "a");

        assert_eq!(graph.sorted().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sorted_breaks_ties_lexicographically() {
        let mut graph = DependencyGraph::new();
        graph.add_project("zeta");
        graph.add_project("alpha");
        graph.add_project("mid");

        assert_eq!(graph.sorted().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("b", "a");
        graph.add_dependency("a", "b");

        match graph.sorted() {
            Err(GraphError::Cycle(nodes)) => {
                assert!(nodes.contains(&"a".to_string()));
                assert!(nodes.contains(&"b".to_string()));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_chain_ordering() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("network", "vpc");
        graph.add_dependency("app", "network");

        assert_eq!(graph.sorted().unwrap(), vec!["vpc", "network", "app"]);
    }
}
