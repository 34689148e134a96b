// src/dag/task_info.rs

//! Task and step records, plus the read-only views handed out to callers.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dag::graph::DagGraph;
use crate::dag::template::TaskTemplate;
use crate::engine::retry::RetryPolicy;
use crate::errors::{Result, StepgraphError};
use crate::registry::StepFailure;
use crate::types::{ErrorKind, StepName, StepState, TaskStatus};

/// Request to instantiate a template as a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    pub namespace: String,
    /// Exact template version, or `None` for the latest registered one.
    pub version: Option<String>,
    /// JSON object handed to every step.
    pub context: Value,
    pub initiator: String,
    pub source_system: String,
    pub reason: String,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, context: Value) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: None,
            context,
            initiator: "stepgraph".to_string(),
            source_system: "stepgraph".to_string(),
            reason: String::new(),
        }
    }
}

/// A recorded handler failure for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    pub error_code: Option<String>,
    pub retryable: bool,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

impl StepError {
    pub fn from_failure(failure: &StepFailure, attempt: u32) -> Self {
        Self {
            kind: failure.kind,
            message: failure.message.clone(),
            error_code: failure.error_code.clone(),
            retryable: failure.is_retryable(),
            attempt,
            occurred_at: Utc::now(),
        }
    }
}

/// Task-level condition that overrides step aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFault {
    Cancelled { at: DateTime<Utc> },
    EngineError { message: String, at: DateTime<Utc> },
}

/// One node of a task's step graph, with its mutable execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_uuid: Uuid,
    pub name: StepName,
    pub namespace: String,
    pub handler: String,
    pub depends_on: Vec<StepName>,
    pub state: StepState,
    pub attempts: u32,
    pub retry: RetryPolicy,
    pub command: Option<String>,
    pub timeout: Option<Duration>,
    pub result: Option<Value>,
    pub metadata: Option<Value>,
    pub last_error: Option<StepError>,
    pub error_history: Vec<StepError>,
    /// Bumped on every transition.
    pub version: u64,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
}

/// A workflow instance: immutable request data plus its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_uuid: Uuid,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub context: Value,
    pub initiator: String,
    pub source_system: String,
    pub reason: String,
    pub status: TaskStatus,
    pub fault: Option<TaskFault>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed change.
    pub revision: u64,
    pub steps: BTreeMap<StepName, StepRecord>,
    pub graph: DagGraph,
}

impl TaskRecord {
    /// Instantiate `template` for `request`, with every step `pending`.
    ///
    /// Fails with `ValidationError` if the context is not a JSON object or
    /// lacks a required key, and with `TemplateError` if the step graph is
    /// unusable.
    pub fn from_template(template: &TaskTemplate, request: &TaskRequest) -> Result<Self> {
        let context = match &request.context {
            Value::Object(map) => map,
            Value::Null => {
                return Err(StepgraphError::ValidationError(
                    "task context must be a JSON object (got null)".to_string(),
                ));
            }
            other => {
                return Err(StepgraphError::ValidationError(format!(
                    "task context must be a JSON object (got {})",
                    json_type_name(other)
                )));
            }
        };

        let missing: Vec<&str> = template
            .required_context
            .iter()
            .filter(|key| context.get(key.as_str()).is_none_or(Value::is_null))
            .map(|s| s.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(StepgraphError::ValidationError(format!(
                "missing required context field(s) for '{}': {}",
                template.name,
                missing.join(", ")
            )));
        }

        let graph = template.validate()?;

        let steps = template
            .steps
            .iter()
            .map(|def| {
                let record = StepRecord {
                    step_uuid: Uuid::new_v4(),
                    name: def.name.clone(),
                    namespace: template.namespace.clone(),
                    handler: def.handler.clone(),
                    depends_on: def.depends_on.clone(),
                    state: StepState::Pending,
                    attempts: 0,
                    retry: def.retry,
                    command: def.command.clone(),
                    timeout: def.timeout,
                    result: None,
                    metadata: None,
                    last_error: None,
                    error_history: Vec::new(),
                    version: 0,
                    dispatched_at: None,
                    completed_at: None,
                    retry_at: None,
                };
                (def.name.clone(), record)
            })
            .collect();

        let now = Utc::now();
        Ok(Self {
            task_uuid: Uuid::new_v4(),
            name: template.name.clone(),
            namespace: template.namespace.clone(),
            version: template.version.clone(),
            context: request.context.clone(),
            initiator: request.initiator.clone(),
            source_system: request.source_system.clone(),
            reason: request.reason.clone(),
            status: TaskStatus::Pending,
            fault: None,
            created_at: now,
            updated_at: now,
            revision: 0,
            steps,
            graph,
        })
    }

    pub fn step(&self, name: &str) -> Result<&StepRecord> {
        self.steps
            .get(name)
            .ok_or_else(|| StepgraphError::StepNotFound {
                task: self.task_uuid,
                step: name.to_string(),
            })
    }

    /// Public view of the task, steps in topological order.
    pub fn snapshot(&self) -> TaskSnapshot {
        let steps: Vec<StepSnapshot> = self
            .graph
            .steps()
            .filter_map(|name| self.steps.get(name))
            .map(StepSnapshot::from)
            .collect();
        let total_steps = steps.len();
        let completed_steps = steps
            .iter()
            .filter(|s| s.current_state == StepState::Complete)
            .count();
        let completion_percentage = if total_steps == 0 {
            0.0
        } else {
            (completed_steps as f64 / total_steps as f64) * 100.0
        };

        TaskSnapshot {
            task_uuid: self.task_uuid,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            version: self.version.clone(),
            status: self.status,
            context: self.context.clone(),
            initiator: self.initiator.clone(),
            source_system: self.source_system.clone(),
            reason: self.reason.clone(),
            fault: self.fault.clone(),
            total_steps,
            completed_steps,
            completion_percentage,
            created_at: self.created_at,
            updated_at: self.updated_at,
            steps,
        }
    }
}

/// Read-only view of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_uuid: Uuid,
    pub name: StepName,
    pub namespace: String,
    pub handler: String,
    pub depends_on: Vec<StepName>,
    pub current_state: StepState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub error: Option<StepError>,
    pub error_history: Vec<StepError>,
}

impl From<&StepRecord> for StepSnapshot {
    fn from(step: &StepRecord) -> Self {
        Self {
            step_uuid: step.step_uuid,
            name: step.name.clone(),
            namespace: step.namespace.clone(),
            handler: step.handler.clone(),
            depends_on: step.depends_on.clone(),
            current_state: step.state,
            attempts: step.attempts,
            max_attempts: step.retry.max_attempts,
            result: step.result.clone(),
            error: step.last_error.clone(),
            error_history: step.error_history.clone(),
        }
    }
}

/// Read-only view of a task, as returned by `get_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_uuid: Uuid,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub status: TaskStatus,
    pub context: Value,
    pub initiator: String,
    pub source_system: String,
    pub reason: String,
    pub fault: Option<TaskFault>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub completion_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<StepSnapshot>,
}

impl TaskSnapshot {
    pub fn step(&self, name: &str) -> Option<&StepSnapshot> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Names of steps currently in `state`, in topological order.
    pub fn steps_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.current_state == state)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Returned by `create_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_uuid: Uuid,
    pub status: TaskStatus,
}

/// A step the engine has claimed for execution, with its resolved inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedStep {
    pub task_uuid: Uuid,
    pub step_uuid: Uuid,
    pub step_name: StepName,
    pub namespace: String,
    pub handler: String,
    /// 1-based attempt number of this dispatch.
    pub attempt: u32,
    pub context: Value,
    /// Results of every completed ancestor step, keyed by step name.
    pub dependency_results: BTreeMap<StepName, Value>,
    pub command: Option<String>,
    pub timeout: Option<Duration>,
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dag::template::StepDefinition;

    fn template() -> TaskTemplate {
        let mut b = StepDefinition::new("b");
        b.depends_on = vec!["a".into()];
        TaskTemplate {
            name: "order".into(),
            namespace: "shop".into(),
            version: "1.0.0".into(),
            description: None,
            required_context: vec!["cart".into(), "customer".into()],
            steps: vec![b, StepDefinition::new("a")],
        }
    }

    #[test]
    fn builds_pending_record() {
        let req = TaskRequest::new("order", "shop", json!({"cart": [1], "customer": "x"}));
        let rec = TaskRecord::from_template(&template(), &req).unwrap();
        assert_eq!(rec.status, TaskStatus::Pending);
        assert!(rec.steps.values().all(|s| s.state == StepState::Pending && s.attempts == 0));

        let snap = rec.snapshot();
        assert_eq!(snap.total_steps, 2);
        assert_eq!(snap.completion_percentage, 0.0);
        // Topological order, not declaration order.
        assert_eq!(snap.steps[0].name, "a");
        assert_eq!(snap.steps[1].name, "b");
    }

    #[test]
    fn missing_required_context_is_validation_error() {
        let req = TaskRequest::new("order", "shop", json!({"cart": [1], "customer": null}));
        match TaskRecord::from_template(&template(), &req) {
            Err(StepgraphError::ValidationError(msg)) => assert!(msg.contains("customer")),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn non_object_context_is_validation_error() {
        let req = TaskRequest::new("order", "shop", json!([1, 2]));
        assert!(matches!(
            TaskRecord::from_template(&template(), &req),
            Err(StepgraphError::ValidationError(m)) if m.contains("array")
        ));
    }
}
