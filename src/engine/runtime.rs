// src/engine/runtime.rs

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::dag::task_info::DispatchedStep;
use crate::events::{EngineEvent, EventLog, EventPredicate, Subscription};
use crate::exec::DispatchBackend;

use super::core::Orchestrator;
use super::{CoreCommand, CoreStep};

/// Compact the event log after this many acknowledged events.
const COMPACT_EVERY: u64 = 256;

/// Events of tasks that belong to partition `index` of `count`, plus
/// shutdown requests.
pub fn partition_predicate(index: usize, count: usize) -> EventPredicate {
    let count = count.max(1) as u128;
    let index = index as u128;
    Arc::new(move |event: &EngineEvent| match event.task_uuid() {
        Some(id) => id.as_u128() % count == index,
        None => true,
    })
}

/// One scheduler loop: reads its partition of the event log, feeds events
/// into the [`Orchestrator`] and carries out the resulting commands.
///
/// Every task maps to exactly one partition, so a task's events are always
/// handled in log order by a single loop.
pub struct Runtime {
    core: Orchestrator,
    events: EventLog,
    subscription: Subscription,
    backend: Arc<dyn DispatchBackend>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Subscribe partition `index` of `count` as consumer `scheduler-<index>`.
    ///
    /// A loop restarted with the same index resumes after the last event the
    /// previous one acknowledged.
    pub fn new(
        core: Orchestrator,
        events: EventLog,
        backend: Arc<dyn DispatchBackend>,
        index: usize,
        count: usize,
    ) -> Self {
        let subscription =
            events.subscribe(format!("scheduler-{index}"), partition_predicate(index, count));
        Self {
            core,
            events,
            subscription,
            backend,
        }
    }

    /// Main event loop.
    ///
    /// - Waits for the next event of this partition.
    /// - Feeds it into the core and executes the returned commands.
    /// - Acknowledges the event once its commands are done.
    ///
    /// An engine-level failure while handling an event moves that event's
    /// task to `error`; the loop only stops on shutdown or when the log
    /// closes.
    pub async fn run(mut self) {
        info!(consumer = self.subscription.consumer(), "scheduler loop started");
        let mut handled: u64 = 0;

        while let Some(envelope) = self.subscription.next().await {
            debug!(offset = envelope.offset, event = envelope.event.kind(), "scheduler received event");
            let task_uuid = envelope.event.task_uuid();

            let step = match self.core.step(envelope.event) {
                Ok(step) => step,
                Err(e) => {
                    self.fault(task_uuid, &format!("engine fault: {e}"));
                    CoreStep::continue_with(Vec::new())
                }
            };
            for command in step.commands {
                self.execute_command(command).await;
            }
            self.subscription.ack(envelope.offset);

            handled += 1;
            if handled % COMPACT_EVERY == 0 {
                self.events.compact();
            }

            if !step.keep_running {
                info!(consumer = self.subscription.consumer(), "shutdown requested; stopping scheduler loop");
                return;
            }
        }

        info!(consumer = self.subscription.consumer(), "event log closed; scheduler loop exiting");
    }

    /// Record an engine fault against the task an event belonged to.
    fn fault(&self, task_uuid: Option<Uuid>, reason: &str) {
        let Some(task_uuid) = task_uuid else {
            error!(reason, "engine fault outside any task");
            return;
        };
        if let Err(e) = self.core.store().fail_task(task_uuid, reason) {
            error!(task = %task_uuid, reason, error = %e, "could not record engine fault");
        }
    }

    async fn execute_command(&self, command: CoreCommand) {
        match command {
            CoreCommand::DispatchSteps(steps) => self.dispatch(steps).await,
            CoreCommand::ScheduleRetry {
                task_uuid,
                step,
                attempt,
                delay,
            } => {
                debug!(task = %task_uuid, step = %step, attempt, ?delay, "retry timer armed");
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    events.publish(EngineEvent::RetryDue {
                        task_uuid,
                        step,
                        attempt,
                    });
                });
            }
            CoreCommand::TaskFinished { task_uuid, status } => {
                info!(task = %task_uuid, status = %status, "task reached terminal status");
            }
        }
    }

    async fn dispatch(&self, steps: Vec<DispatchedStep>) {
        if steps.is_empty() {
            return;
        }

        let tasks: BTreeSet<Uuid> = steps.iter().map(|s| s.task_uuid).collect();
        let names: Vec<_> = steps.iter().map(|s| s.step_name.as_str()).collect();
        debug!(?names, "dispatching ready steps");

        if let Err(e) = self.backend.dispatch(steps).await {
            // The steps are already marked dispatched; without a backend
            // they would never finish, so fail their tasks instead.
            error!(error = %e, "dispatch failed");
            let reason = format!("dispatch failed: {e}");
            for task_uuid in tasks {
                self.fault(Some(task_uuid), &reason);
            }
        }
    }
}
