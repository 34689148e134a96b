// src/engine/event_handlers.rs

//! Event handling logic for the orchestrator core.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::task_info::DispatchedStep;
use crate::dag::transition::{StepChange, StepUpdate};
use crate::errors::{Result, StepgraphError};
use crate::registry::HandlerOutcome;
use crate::store::TaskStore;
use crate::types::{StepName, TaskStatus};

/// Command produced by the core, to be executed by the async shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these steps to the dispatch backend.
    DispatchSteps(Vec<DispatchedStep>),
    /// Publish `RetryDue` for this attempt after `delay`.
    ScheduleRetry {
        task_uuid: Uuid,
        step: StepName,
        attempt: u32,
        delay: Duration,
    },
    /// The task reached a terminal status.
    TaskFinished { task_uuid: Uuid, status: TaskStatus },
}

/// Decision returned by the core after handling one event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the scheduler loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub fn stop() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: false,
        }
    }
}

/// A new task: dispatch its root steps.
pub fn handle_task_created(store: &dyn TaskStore, task_uuid: Uuid) -> Result<CoreStep> {
    let ready = store.claim_ready_steps(task_uuid)?;
    debug!(task = %task_uuid, ready = ready.len(), "task created; roots claimed");
    Ok(CoreStep::continue_with(dispatch(ready)))
}

/// A handler finished an attempt: commit it, then re-evaluate readiness.
pub fn handle_step_result(
    store: &dyn TaskStore,
    task_uuid: Uuid,
    step: StepName,
    attempt: u32,
    outcome: HandlerOutcome,
) -> Result<CoreStep> {
    let change = match outcome {
        HandlerOutcome::Success { result, metadata } => StepChange::Complete { result, metadata },
        HandlerOutcome::Failure(failure) => StepChange::Failure(failure),
    };
    let update = StepUpdate {
        step,
        attempt: Some(attempt),
        change,
    };

    let transition = match store.update_step(task_uuid, &update) {
        Ok(t) => t,
        Err(e) if e.is_conflict() => {
            // Duplicate delivery, or a result for a cancelled task.
            warn!(task = %task_uuid, step = %update.step, attempt, error = %e, "discarding step result");
            return Ok(CoreStep::continue_with(Vec::new()));
        }
        Err(e) => return Err(e),
    };

    let mut commands = Vec::new();
    if let Some(retry) = transition.retry {
        commands.push(CoreCommand::ScheduleRetry {
            task_uuid,
            step: transition.step.clone(),
            attempt: retry.attempt,
            delay: retry.delay,
        });
    }

    if transition.task_finished {
        commands.push(CoreCommand::TaskFinished {
            task_uuid,
            status: transition.task_status,
        });
    } else {
        commands.extend(dispatch(store.claim_ready_steps(task_uuid)?));
    }

    Ok(CoreStep::continue_with(commands))
}

/// A retry delay elapsed: put the step back to `pending` and dispatch it.
pub fn handle_retry_due(
    store: &dyn TaskStore,
    task_uuid: Uuid,
    step: StepName,
    attempt: u32,
) -> Result<CoreStep> {
    match store.update_step(task_uuid, &StepUpdate::requeue(step.clone(), attempt)) {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            debug!(task = %task_uuid, step = %step, attempt, error = %e, "stale retry; ignoring");
            return Ok(CoreStep::continue_with(Vec::new()));
        }
        Err(e) => return Err(e),
    }
    Ok(CoreStep::continue_with(dispatch(
        store.claim_ready_steps(task_uuid)?,
    )))
}

/// Cancel a task. In-flight results will be discarded on arrival.
pub fn handle_cancel(store: &dyn TaskStore, task_uuid: Uuid) -> Result<CoreStep> {
    let snapshot = store.cancel_task(task_uuid)?;
    info!(task = %task_uuid, status = %snapshot.status, "cancel request processed");
    let commands = if snapshot.status == TaskStatus::Cancelled {
        vec![CoreCommand::TaskFinished {
            task_uuid,
            status: snapshot.status,
        }]
    } else {
        Vec::new()
    };
    Ok(CoreStep::continue_with(commands))
}

/// Errors that only concern one task and must not stop the loop.
pub fn is_task_local(err: &StepgraphError) -> bool {
    matches!(
        err,
        StepgraphError::TaskNotFound(_)
            | StepgraphError::StepNotFound { .. }
            | StepgraphError::ConflictError(_)
    )
}

fn dispatch(ready: Vec<DispatchedStep>) -> Vec<CoreCommand> {
    if ready.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::DispatchSteps(ready)]
    }
}
