// src/dag/state_manager.rs

//! Mutating operations on a single task record.
//!
//! Every method here runs inside the store's per-task critical section, so
//! the readiness check and the state change it justifies are one atomic step.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::resolver::Resolver;
use crate::dag::state_machine::{aggregate_status, is_legal_transition};
use crate::dag::task_info::{DispatchedStep, StepError, StepRecord, TaskFault, TaskRecord};
use crate::dag::transition::{ScheduledRetry, StepChange, StepTransition, StepUpdate};
use crate::errors::{Result, StepgraphError};
use crate::registry::StepFailure;
use crate::types::{StepName, StepState};

/// Applies transitions to one task and keeps its status in sync.
pub struct StateManager<'a> {
    record: &'a mut TaskRecord,
}

impl<'a> StateManager<'a> {
    pub fn new(record: &'a mut TaskRecord) -> Self {
        Self { record }
    }

    /// Move every ready step to `dispatched` and return its dispatch payload.
    ///
    /// A terminal task yields nothing.
    pub fn claim_ready_steps(&mut self) -> Vec<DispatchedStep> {
        if self.record.status.is_terminal() {
            return Vec::new();
        }

        let ready: Vec<StepName> = Resolver::new(&self.record.graph, &self.record.steps)
            .ready_steps()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut claimed = Vec::with_capacity(ready.len());
        for name in ready {
            let dependency_results =
                Resolver::new(&self.record.graph, &self.record.steps).dependency_results(&name);
            let task_uuid = self.record.task_uuid;
            let context = self.record.context.clone();

            let Some(step) = self.record.steps.get_mut(&name) else {
                continue;
            };
            if let Err(e) = transition(task_uuid, step, StepState::Dispatched) {
                warn!(task = %task_uuid, step = %name, error = %e, "skipping claim");
                continue;
            }
            step.attempts += 1;
            step.dispatched_at = Some(Utc::now());
            step.retry_at = None;

            if step.attempts > 1 {
                info!(task = %task_uuid, step = %name, attempt = step.attempts, "dispatching step retry");
            } else {
                info!(task = %task_uuid, step = %name, "dispatching step");
            }

            claimed.push(DispatchedStep {
                task_uuid,
                step_uuid: step.step_uuid,
                step_name: step.name.clone(),
                namespace: step.namespace.clone(),
                handler: step.handler.clone(),
                attempt: step.attempts,
                context,
                dependency_results,
                command: step.command.clone(),
                timeout: step.timeout,
            });
        }

        if !claimed.is_empty() {
            self.refresh_status();
        }
        claimed
    }

    /// Apply one step update atomically.
    ///
    /// Fails with `ConflictError` if the task is terminal, the attempt
    /// precondition does not hold, or the transition is illegal.
    pub fn apply(&mut self, update: &StepUpdate) -> Result<StepTransition> {
        let task_uuid = self.record.task_uuid;
        if self.record.status.is_terminal() {
            return Err(StepgraphError::ConflictError(format!(
                "task {task_uuid} is {} and can no longer change",
                self.record.status
            )));
        }

        let step = self
            .record
            .steps
            .get_mut(&update.step)
            .ok_or_else(|| StepgraphError::StepNotFound {
                task: task_uuid,
                step: update.step.clone(),
            })?;

        if let Some(expected) = update.attempt
            && step.attempts != expected
        {
            return Err(StepgraphError::ConflictError(format!(
                "step '{}' of task {task_uuid} is on attempt {}, update was for attempt {expected}",
                step.name, step.attempts
            )));
        }

        let from = step.state;
        let mut retry = None;
        let mut failed = false;

        match &update.change {
            StepChange::Complete { result, metadata } => {
                transition(task_uuid, step, StepState::Complete)?;
                step.result = Some(result.clone());
                step.metadata = metadata.clone();
                step.completed_at = Some(Utc::now());
                debug!(task = %task_uuid, step = %step.name, attempt = step.attempts, "step complete");
            }
            StepChange::Failure(failure) => {
                if from != StepState::Dispatched {
                    return Err(illegal(task_uuid, step, StepState::Failed));
                }
                let error = StepError::from_failure(failure, step.attempts);
                let may_retry = error.retryable && step.retry.allows_another_attempt(step.attempts);

                if may_retry {
                    transition(task_uuid, step, StepState::Retrying)?;
                    let delay = step.retry.backoff.delay_for(step.attempts);
                    step.retry_at = chrono::Duration::from_std(delay)
                        .ok()
                        .map(|d| Utc::now() + d);
                    retry = Some(ScheduledRetry {
                        attempt: step.attempts,
                        delay,
                    });
                    warn!(
                        task = %task_uuid,
                        step = %step.name,
                        attempt = step.attempts,
                        max_attempts = step.retry.max_attempts,
                        ?delay,
                        error = %error.message,
                        "step failed; retry scheduled"
                    );
                } else {
                    transition(task_uuid, step, StepState::Failed)?;
                    step.completed_at = Some(Utc::now());
                    failed = true;
                    warn!(
                        task = %task_uuid,
                        step = %step.name,
                        attempt = step.attempts,
                        kind = %error.kind,
                        error = %error.message,
                        "step failed permanently"
                    );
                }
                step.last_error = Some(error.clone());
                step.error_history.push(error);
            }
            StepChange::Requeue => {
                transition(task_uuid, step, StepState::Pending)?;
                step.retry_at = None;
                debug!(task = %task_uuid, step = %step.name, "retry delay elapsed; step pending");
            }
        }

        let to = step.state;
        let newly_blocked = if failed {
            self.mark_dependents_blocked(&update.step)
        } else {
            Vec::new()
        };

        let was_terminal = self.record.status.is_terminal();
        self.refresh_status();
        let task_status = self.record.status;

        Ok(StepTransition {
            step: update.step.clone(),
            from,
            to,
            task_status,
            newly_blocked,
            retry,
            task_finished: !was_terminal && task_status.is_terminal(),
        })
    }

    /// Force every pending or dispatched transitive dependent of `failed`
    /// into `blocked`. Returns the names that changed.
    pub fn mark_dependents_blocked(&mut self, failed: &str) -> Vec<StepName> {
        let targets = Resolver::new(&self.record.graph, &self.record.steps).to_block(failed);
        let task_uuid = self.record.task_uuid;
        let mut blocked = Vec::with_capacity(targets.len());

        for name in targets {
            if let Some(step) = self.record.steps.get_mut(&name)
                && transition(task_uuid, step, StepState::Blocked).is_ok()
            {
                step.completed_at = Some(Utc::now());
                debug!(task = %task_uuid, step = %name, upstream = %failed, "blocked by upstream failure");
                blocked.push(name);
            }
        }
        blocked
    }

    /// Put steps interrupted by an engine restart back in line. Returns the
    /// names that went back to `pending`.
    ///
    /// A `dispatched` attempt never reported back, so it is recorded as a
    /// handler failure coded `interrupted` and the retry policy decides
    /// whether the step runs again. Pending retry timers died with the
    /// previous run; those steps are requeued at once.
    pub fn recover(&mut self) -> Vec<StepName> {
        if self.record.status.is_terminal() {
            return Vec::new();
        }

        let interrupted: Vec<(StepName, StepState, u32)> = self
            .record
            .graph
            .steps()
            .filter_map(|name| self.record.steps.get(name))
            .filter(|s| s.state.is_in_flight())
            .map(|s| (s.name.clone(), s.state, s.attempts))
            .collect();

        let task_uuid = self.record.task_uuid;
        let mut requeued = Vec::with_capacity(interrupted.len());
        for (name, state, attempt) in interrupted {
            if state == StepState::Dispatched {
                let failure = StepFailure::handler("attempt interrupted by engine restart")
                    .with_code("interrupted");
                match self.apply(&StepUpdate::failure(name.clone(), attempt, failure)) {
                    Ok(t) if t.to == StepState::Retrying => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(task = %task_uuid, step = %name, error = %e, "could not recover step");
                        continue;
                    }
                }
            }
            match self.apply(&StepUpdate::requeue(name.clone(), attempt)) {
                Ok(_) => requeued.push(name),
                Err(e) => {
                    warn!(task = %task_uuid, step = %name, error = %e, "could not requeue step");
                }
            }
        }
        requeued
    }

    /// Record a cancellation. Returns `false` if the task was already
    /// terminal.
    pub fn cancel(&mut self) -> bool {
        self.set_fault(TaskFault::Cancelled { at: Utc::now() })
    }

    /// Record an engine fault. Returns `false` if the task was already
    /// terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.set_fault(TaskFault::EngineError {
            message: message.into(),
            at: Utc::now(),
        })
    }

    fn set_fault(&mut self, fault: TaskFault) -> bool {
        if self.record.status.is_terminal() {
            return false;
        }
        self.record.fault = Some(fault);
        self.refresh_status();
        true
    }

    /// Whether every step is terminal.
    pub fn all_steps_terminal(&self) -> bool {
        self.record.steps.values().all(|s| s.state.is_terminal())
    }

    fn refresh_status(&mut self) {
        let status = aggregate_status(self.record.steps.values(), self.record.fault.as_ref());
        if status != self.record.status {
            debug!(task = %self.record.task_uuid, from = %self.record.status, to = %status, "task status changed");
            if status.is_terminal() {
                info!(task = %self.record.task_uuid, status = %status, "task finished");
            }
        }
        self.record.status = status;
        self.record.updated_at = Utc::now();
        self.record.revision += 1;
    }
}

fn transition(task_uuid: uuid::Uuid, step: &mut StepRecord, to: StepState) -> Result<()> {
    if !is_legal_transition(step.state, to) {
        return Err(illegal(task_uuid, step, to));
    }
    step.state = to;
    step.version += 1;
    Ok(())
}

fn illegal(task_uuid: uuid::Uuid, step: &StepRecord, to: StepState) -> StepgraphError {
    StepgraphError::ConflictError(format!(
        "illegal transition for step '{}' of task {task_uuid}: {} -> {to}",
        step.name, step.state
    ))
}
