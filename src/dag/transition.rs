// src/dag/transition.rs

//! Step update requests and the structured result of applying one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::StepFailure;
use crate::types::{StepName, StepState, TaskStatus};

/// What happened to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepChange {
    Complete {
        result: Value,
        metadata: Option<Value>,
    },
    Failure(StepFailure),
    /// A retry delay elapsed; move `retrying` back to `pending`.
    Requeue,
}

/// A requested transition for one step of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub step: StepName,
    /// If set, the update only applies while the step's attempt counter
    /// still equals this value.
    pub attempt: Option<u32>,
    pub change: StepChange,
}

impl StepUpdate {
    pub fn complete(step: impl Into<StepName>, attempt: u32, result: Value) -> Self {
        Self {
            step: step.into(),
            attempt: Some(attempt),
            change: StepChange::Complete {
                result,
                metadata: None,
            },
        }
    }

    pub fn failure(step: impl Into<StepName>, attempt: u32, failure: StepFailure) -> Self {
        Self {
            step: step.into(),
            attempt: Some(attempt),
            change: StepChange::Failure(failure),
        }
    }

    pub fn requeue(step: impl Into<StepName>, attempt: u32) -> Self {
        Self {
            step: step.into(),
            attempt: Some(attempt),
            change: StepChange::Requeue,
        }
    }
}

/// A retry the caller must schedule after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Attempt number that just failed.
    pub attempt: u32,
    pub delay: Duration,
}

/// Structured result of applying a [`StepUpdate`].
///
/// Tests use this to step a task by hand and assert on what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTransition {
    pub step: StepName,
    pub from: StepState,
    pub to: StepState,
    /// Task status after the update.
    pub task_status: TaskStatus,
    /// Dependents newly forced into `blocked` by this update.
    pub newly_blocked: Vec<StepName>,
    pub retry: Option<ScheduledRetry>,
    /// Whether this update moved the task into a terminal status.
    pub task_finished: bool,
}
