// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::DefinitionError;
use crate::types::TaskName;

/// Dependency graph of tasks keyed by name.
///
/// Edge direction is dependency -> dependent: for `deploy.needs = ["publish"]`
/// the graph holds `publish -> deploy`.
///
/// Tasks may name dependencies that are added later; such edges are wired up
/// when the target arrives. Node indices follow declaration order, which is
/// the tie-break everywhere an order is observable.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    graph: DiGraph<TaskName, ()>,
    index: HashMap<TaskName, NodeIndex>,
    /// Declared dependencies per task, deduplicated, in declaration order.
    needs: HashMap<TaskName, Vec<TaskName>>,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task and its dependency edges.
    ///
    /// Fails with `DuplicateName`, `SelfDependency`, or `Cycle` if the new
    /// edges would close a cycle; the graph is unchanged on failure.
    pub fn add_task<I, S>(&mut self, name: &str, needs: I) -> Result<(), DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        if self.index.contains_key(name) {
            return Err(DefinitionError::DuplicateName(name.to_string()));
        }

        let mut deps: Vec<TaskName> = Vec::new();
        for dep in needs {
            let dep = dep.into();
            if dep == name {
                return Err(DefinitionError::SelfDependency(name.to_string()));
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let node = self.graph.add_node(name.to_string());

        for dep in &deps {
            if let Some(&dep_node) = self.index.get(dep) {
                self.graph.add_edge(dep_node, node, ());
            }
        }

        // Earlier tasks that referenced this one before it existed.
        for (other, other_needs) in &self.needs {
            if other_needs.iter().any(|n| n == name) {
                if let Some(&other_node) = self.index.get(other) {
                    self.graph.add_edge(node, other_node, ());
                }
            }
        }

        if is_cyclic_directed(&self.graph) {
            // `node` is the most recent index, so removal shifts nothing.
            self.graph.remove_node(node);
            return Err(DefinitionError::Cycle(name.to_string()));
        }

        self.index.insert(name.to_string(), node);
        self.needs.insert(name.to_string(), deps);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All task names in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|n| self.graph[n].as_str())
    }

    /// Position of a task in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).map(|n| n.index())
    }

    /// Immediate dependencies of a task, as declared in `needs`.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.needs.get(name).map(|n| n.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a task, in declaration order.
    pub fn dependents_of(&self, name: &str) -> Vec<TaskName> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        nodes.sort();
        nodes.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// All transitive dependencies of a task.
    pub fn ancestors_of(&self, name: &str) -> HashSet<TaskName> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(name) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(self.graph[parent].clone()) {
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    /// Fail with `DanglingDependency` if any `needs` entry never resolved.
    pub fn check_resolved(&self) -> Result<(), DefinitionError> {
        for name in self.tasks() {
            for dep in self.dependencies_of(name) {
                if !self.index.contains_key(dep) {
                    return Err(DefinitionError::DanglingDependency {
                        task: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Group tasks into waves: every task appears exactly once, after the
    /// waves of all its dependencies. Within a wave, declaration order.
    pub fn topological_batches(&self) -> Result<Vec<Vec<TaskName>>, DefinitionError> {
        self.check_resolved()?;

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut wave: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut batches = Vec::new();
        let mut placed = 0;

        while !wave.is_empty() {
            wave.sort();
            let mut next = Vec::new();
            for &node in &wave {
                for child in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    in_degree[child.index()] -= 1;
                    if in_degree[child.index()] == 0 {
                        next.push(child);
                    }
                }
            }
            placed += wave.len();
            batches.push(wave.iter().map(|&n| self.graph[n].clone()).collect());
            wave = next;
        }

        if placed != self.graph.node_count() {
            // `add_task` rejects cycles, so this only trips on a corrupted graph.
            let stuck = self
                .graph
                .node_indices()
                .find(|n| in_degree[n.index()] > 0)
                .map(|n| self.graph[n].clone())
                .unwrap_or_default();
            return Err(DefinitionError::Cycle(stuck));
        }

        Ok(batches)
    }
}
