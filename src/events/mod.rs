// src/events/mod.rs

//! Event channel between result submitters and the scheduler loops.
//!
//! Handlers never touch task state directly: they publish a
//! [`EngineEvent::StepResult`] and a scheduler loop picks it up, applies it
//! and re-evaluates readiness. The [`log::EventLog`] keeps events until every
//! consumer has acknowledged them, so a loop that restarts resumes where it
//! left off.

pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::HandlerOutcome;
use crate::types::StepName;

pub use log::{EventLog, EventPredicate, Subscription};

/// Events flowing through the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A task was persisted and its root steps should be dispatched.
    TaskCreated { task_uuid: Uuid },
    /// A handler finished one attempt of a step.
    StepResult {
        task_uuid: Uuid,
        step: StepName,
        attempt: u32,
        outcome: HandlerOutcome,
    },
    /// The backoff delay after a failed attempt has elapsed.
    RetryDue {
        task_uuid: Uuid,
        step: StepName,
        attempt: u32,
    },
    /// Cancellation requested for a task.
    CancelRequested { task_uuid: Uuid },
    /// Graceful shutdown of the scheduler loops.
    ShutdownRequested,
}

impl EngineEvent {
    /// The task this event concerns, if any.
    pub fn task_uuid(&self) -> Option<Uuid> {
        match self {
            EngineEvent::TaskCreated { task_uuid }
            | EngineEvent::StepResult { task_uuid, .. }
            | EngineEvent::RetryDue { task_uuid, .. }
            | EngineEvent::CancelRequested { task_uuid } => Some(*task_uuid),
            EngineEvent::ShutdownRequested => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::TaskCreated { .. } => "task_created",
            EngineEvent::StepResult { .. } => "step_result",
            EngineEvent::RetryDue { .. } => "retry_due",
            EngineEvent::CancelRequested { .. } => "cancel_requested",
            EngineEvent::ShutdownRequested => "shutdown_requested",
        }
    }
}

/// An event plus its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub offset: u64,
    pub published_at: DateTime<Utc>,
    pub event: EngineEvent,
}
