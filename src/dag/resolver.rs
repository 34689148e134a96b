// src/dag/resolver.rs

//! Readiness resolution over a task's step graph.
//!
//! Pure functions of the current step states: nothing here mutates a task.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::dag::graph::DagGraph;
use crate::dag::task_info::StepRecord;
use crate::types::{StepName, StepState};

/// Read-only view over one task's graph and steps.
pub struct Resolver<'a> {
    graph: &'a DagGraph,
    steps: &'a BTreeMap<StepName, StepRecord>,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a DagGraph, steps: &'a BTreeMap<StepName, StepRecord>) -> Self {
        Self { graph, steps }
    }

    /// Whether every direct dependency of `step` is `complete`.
    ///
    /// Returns `None` if the step is unknown.
    pub fn deps_satisfied(&self, step: &str) -> Option<bool> {
        let record = self.steps.get(step)?;
        Some(self.deps_satisfied_for(record))
    }

    fn deps_satisfied_for(&self, record: &StepRecord) -> bool {
        self.graph.dependencies_of(&record.name).iter().all(|dep| {
            match self.steps.get(dep) {
                Some(d) => d.state == StepState::Complete,
                None => {
                    warn!(step = %record.name, dep = %dep, "dependency missing from step map");
                    false
                }
            }
        })
    }

    /// Steps that are `pending` with every dependency `complete`, in
    /// topological order.
    pub fn ready_steps(&self) -> Vec<&'a str> {
        self.graph
            .steps()
            .filter(|name| {
                self.steps
                    .get(*name)
                    .is_some_and(|s| s.state == StepState::Pending && self.deps_satisfied_for(s))
            })
            .collect()
    }

    /// Results of every completed ancestor of `step`, keyed by step name.
    pub fn dependency_results(&self, step: &str) -> BTreeMap<StepName, Value> {
        self.graph
            .ancestors_of(step)
            .into_iter()
            .filter_map(|name| {
                let record = self.steps.get(&name)?;
                if record.state != StepState::Complete {
                    return None;
                }
                Some((name, record.result.clone().unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// Transitive dependents of `failed` that must become `blocked`.
    pub fn to_block(&self, failed: &str) -> Vec<StepName> {
        self.graph
            .descendants_of(failed)
            .into_iter()
            .filter(|name| {
                self.steps
                    .get(name)
                    .is_some_and(|s| matches!(s.state, StepState::Pending | StepState::Dispatched))
            })
            .collect()
    }
}
