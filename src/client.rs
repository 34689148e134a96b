// src/client.rs

//! Polling helper for callers waiting on a task.
//!
//! `blocked_by_failures` is terminal for the engine, but a caller may prefer
//! to give it a grace window before giving up: the task is only reported
//! blocked once it has stayed blocked for `failure_grace`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::dag::task_info::TaskSnapshot;
use crate::engine::Engine;
use crate::errors::{Result, StepgraphError};
use crate::store::TaskStore;
use crate::types::TaskStatus;

/// Anything that can return a task snapshot.
pub trait TaskLookup {
    fn lookup(&self, task_uuid: Uuid) -> Result<TaskSnapshot>;
}

impl TaskLookup for Engine {
    fn lookup(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.get_task(task_uuid)
    }
}

impl TaskLookup for Arc<dyn TaskStore> {
    fn lookup(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.get_task(task_uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between two lookups.
    pub interval: Duration,
    /// Overall deadline.
    pub timeout: Duration,
    /// How long `blocked_by_failures` must persist before it is accepted.
    pub failure_grace: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
            failure_grace: Duration::from_secs(10),
        }
    }
}

/// Poll until the task is `complete`, `error` or `cancelled`, or has been
/// `blocked_by_failures` for the whole grace window.
///
/// Fails with `Timeout` if none of that happens before `options.timeout`.
pub async fn wait_for_completion<L>(
    source: &L,
    task_uuid: Uuid,
    options: PollOptions,
) -> Result<TaskSnapshot>
where
    L: TaskLookup + ?Sized,
{
    let deadline = Instant::now() + options.timeout;
    let mut blocked_since: Option<Instant> = None;

    loop {
        let snapshot = source.lookup(task_uuid)?;
        let now = Instant::now();

        match snapshot.status {
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled => {
                return Ok(snapshot);
            }
            TaskStatus::BlockedByFailures => {
                let since = *blocked_since.get_or_insert(now);
                if now.duration_since(since) >= options.failure_grace {
                    return Ok(snapshot);
                }
            }
            TaskStatus::Pending | TaskStatus::Processing => {
                blocked_since = None;
            }
        }

        if now >= deadline {
            return Err(StepgraphError::Timeout(format!(
                "task {task_uuid} still {} after {:?} ({}/{} steps complete)",
                snapshot.status, options.timeout, snapshot.completed_steps, snapshot.total_steps
            )));
        }

        debug!(
            task = %task_uuid,
            status = %snapshot.status,
            completed = snapshot.completed_steps,
            total = snapshot.total_steps,
            "waiting for task"
        );
        tokio::time::sleep(options.interval.min(deadline - now)).await;
    }
}
