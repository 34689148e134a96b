// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::dag::template::StepDefinition;
use crate::types::StepName;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DagNode {
    /// Direct dependencies: steps that must complete before this one can run.
    deps: Vec<StepName>,
    /// Direct dependents: steps that depend on this one.
    dependents: Vec<StepName>,
}

/// In-memory step DAG keyed by step name, plus a topological order.
///
/// Construction is the single place where acyclicity is checked; everything
/// downstream can assume a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagGraph {
    nodes: HashMap<StepName, DagNode>,
    order: Vec<StepName>,
}

impl DagGraph {
    /// Build a DAG from step definitions whose dependencies all refer to
    /// known steps.
    ///
    /// Returns the name of a step on a cycle if the graph is not acyclic.
    pub fn from_steps(steps: &[StepDefinition]) -> Result<Self, StepName> {
        // Edge direction: dep -> step. For `b.depends_on = ["a"]` we add a -> b.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for step in steps {
            graph.add_node(step.name.as_str());
        }
        for step in steps {
            for dep in &step.depends_on {
                graph.add_edge(dep.as_str(), step.name.as_str(), ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(str::to_string).collect::<Vec<_>>(),
            Err(cycle) => return Err(cycle.node_id().to_string()),
        };

        let mut nodes: HashMap<StepName, DagNode> = steps
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    DagNode {
                        deps: s.depends_on.clone(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        // Populate dependents in topological order so the lists are stable.
        for name in &order {
            let deps = nodes.get(name).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        Ok(Self { nodes, order })
    }

    /// All step names in a topological order (dependencies first).
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Steps without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.steps().filter(|s| self.dependencies_of(s).is_empty())
    }

    /// Immediate dependencies of a step.
    pub fn dependencies_of(&self, name: &str) -> &[StepName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a step.
    pub fn dependents_of(&self, name: &str) -> &[StepName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every transitive predecessor of `name`, in topological order.
    pub fn ancestors_of(&self, name: &str) -> Vec<StepName> {
        let found = self.walk(name, |n| self.dependencies_of(n));
        self.order
            .iter()
            .filter(|s| found.contains(s.as_str()))
            .cloned()
            .collect()
    }

    /// Every transitive successor of `name`, in topological order.
    pub fn descendants_of(&self, name: &str) -> Vec<StepName> {
        let found = self.walk(name, |n| self.dependents_of(n));
        self.order
            .iter()
            .filter(|s| found.contains(s.as_str()))
            .cloned()
            .collect()
    }

    fn walk<'a, F>(&'a self, start: &str, next: F) -> HashSet<&'a str>
    where
        F: Fn(&str) -> &'a [StepName],
    {
        let mut visited: HashSet<&'a str> = HashSet::new();
        let mut stack: Vec<&'a str> = next(start).iter().map(|s| s.as_str()).collect();
        while let Some(name) = stack.pop() {
            if visited.insert(name) {
                stack.extend(next(name).iter().map(|s| s.as_str()));
            }
        }
        visited
    }
}
