// src/dag/state_machine.rs

//! Legal step transitions and task status aggregation.
//!
//! Step lifecycle:
//!
//! ```text
//! pending -> dispatched -> complete
//!                       -> retrying -> pending
//!                       -> failed
//! pending | dispatched  -> blocked
//! ```

use crate::dag::task_info::{StepRecord, TaskFault};
use crate::types::{StepState, TaskStatus};

/// Whether a step may move from `from` to `to`.
pub fn is_legal_transition(from: StepState, to: StepState) -> bool {
    use StepState::*;
    matches!(
        (from, to),
        (Pending, Dispatched)
            | (Dispatched, Complete)
            | (Dispatched, Retrying)
            | (Dispatched, Failed)
            | (Retrying, Pending)
            | (Pending, Blocked)
            | (Dispatched, Blocked)
    )
}

/// Derive a task's status from its steps and task-level fault.
pub fn aggregate_status<'a, I>(steps: I, fault: Option<&TaskFault>) -> TaskStatus
where
    I: IntoIterator<Item = &'a StepRecord>,
{
    match fault {
        Some(TaskFault::Cancelled { .. }) => return TaskStatus::Cancelled,
        Some(TaskFault::EngineError { .. }) => return TaskStatus::Error,
        None => {}
    }

    let mut total = 0usize;
    let mut complete = 0usize;
    let mut any_failed = false;
    let mut any_open = false;
    let mut any_started = false;

    for step in steps {
        total += 1;
        match step.state {
            StepState::Complete => complete += 1,
            StepState::Failed | StepState::Blocked => any_failed = true,
            StepState::Pending | StepState::Dispatched | StepState::Retrying => any_open = true,
        }
        if step.attempts > 0 {
            any_started = true;
        }
    }

    if total > 0 && complete == total {
        TaskStatus::Complete
    } else if any_failed && !any_open {
        TaskStatus::BlockedByFailures
    } else if !any_started {
        TaskStatus::Pending
    } else {
        TaskStatus::Processing
    }
}
