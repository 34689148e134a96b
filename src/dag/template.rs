// src/dag/template.rs

//! Workflow templates: the static step graph a task is instantiated from.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dag::graph::DagGraph;
use crate::engine::retry::RetryPolicy;
use crate::errors::{Result, StepgraphError};
use crate::types::StepName;

/// One node of a template's step graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: StepName,
    /// Handler name looked up in the registry under the template namespace.
    pub handler: String,
    /// Direct predecessors.
    pub depends_on: Vec<StepName>,
    pub retry: RetryPolicy,
    /// Shell command run by the built-in command handler, if any.
    pub command: Option<String>,
    /// Upper bound on a single handler invocation.
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    /// A step whose handler name equals its step name.
    pub fn new(name: impl Into<StepName>) -> Self {
        let name = name.into();
        Self {
            handler: name.clone(),
            name,
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
            command: None,
            timeout: None,
        }
    }
}

/// A named, versioned step graph owned by a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub description: Option<String>,
    /// Keys that must be present in a task's context.
    pub required_context: Vec<String>,
    pub steps: Vec<StepDefinition>,
}

impl TaskTemplate {
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check the template is structurally usable and build its graph.
    ///
    /// Fails with [`StepgraphError::TemplateError`] on:
    /// - no steps, or a malformed / duplicate step name
    /// - a dependency on an unknown step, or on the step itself
    /// - a dependency cycle
    pub fn validate(&self) -> Result<DagGraph> {
        if self.steps.is_empty() {
            return Err(StepgraphError::TemplateError(format!(
                "template '{}' in namespace '{}' has no steps",
                self.name, self.namespace
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if !is_valid_name(&step.name) {
                return Err(StepgraphError::TemplateError(format!(
                    "template '{}': invalid step name '{}'",
                    self.name, step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(StepgraphError::TemplateError(format!(
                    "template '{}': duplicate step '{}'",
                    self.name, step.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(StepgraphError::TemplateError(format!(
                        "template '{}': step '{}' cannot depend on itself",
                        self.name, step.name
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(StepgraphError::TemplateError(format!(
                        "template '{}': step '{}' has unknown dependency '{}'",
                        self.name, step.name, dep
                    )));
                }
            }
        }

        DagGraph::from_steps(&self.steps).map_err(|cycle_at| {
            StepgraphError::TemplateError(format!(
                "template '{}': cycle detected in step graph involving step '{}'",
                self.name, cycle_at
            ))
        })
    }
}

/// Step, template and namespace names: letters, digits, `_`, `-`, `.`.
pub fn is_valid_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("static regex is valid")
    });
    re.is_match(name)
}
