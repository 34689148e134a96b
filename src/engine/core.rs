// src/engine/core.rs

//! Synchronous orchestrator core.
//!
//! [`Orchestrator::step`] consumes one [`EngineEvent`] and returns the
//! commands the async shell (`engine::runtime`) should carry out. It touches
//! the task store but never channels, timers or handlers, so it can be driven
//! by hand in tests.

use std::sync::Arc;

use tracing::{error, warn};

use crate::engine::event_handlers::{
    handle_cancel, handle_retry_due, handle_step_result, handle_task_created, is_task_local,
    CoreStep,
};
use crate::errors::Result;
use crate::events::EngineEvent;
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Handle one event.
    ///
    /// Errors that concern a single task (unknown task, stale update) are
    /// logged and swallowed; store failures are returned.
    pub fn step(&self, event: EngineEvent) -> Result<CoreStep> {
        let task_uuid = event.task_uuid();
        let kind = event.kind();
        let store = self.store.as_ref();

        let result = match event {
            EngineEvent::TaskCreated { task_uuid } => handle_task_created(store, task_uuid),
            EngineEvent::StepResult {
                task_uuid,
                step,
                attempt,
                outcome,
            } => handle_step_result(store, task_uuid, step, attempt, outcome),
            EngineEvent::RetryDue {
                task_uuid,
                step,
                attempt,
            } => handle_retry_due(store, task_uuid, step, attempt),
            EngineEvent::CancelRequested { task_uuid } => handle_cancel(store, task_uuid),
            EngineEvent::ShutdownRequested => return Ok(CoreStep::stop()),
        };

        match result {
            Ok(step) => Ok(step),
            Err(e) if is_task_local(&e) => {
                warn!(task = ?task_uuid, event = kind, error = %e, "event dropped");
                Ok(CoreStep::continue_with(Vec::new()))
            }
            Err(e) => {
                error!(task = ?task_uuid, event = kind, error = %e, "event handling failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dag::task_info::{TaskRecord, TaskRequest};
    use crate::dag::template::{StepDefinition, TaskTemplate};
    use crate::engine::event_handlers::CoreCommand;
    use crate::engine::retry::{Backoff, RetryPolicy};
    use crate::registry::{HandlerOutcome, StepFailure};
    use crate::store::MemoryTaskStore;
    use crate::types::TaskStatus;

    fn setup() -> (Orchestrator, uuid::Uuid) {
        let mut b = StepDefinition::new("b");
        b.depends_on = vec!["a".into()];
        b.retry = RetryPolicy::new(
            2,
            Backoff::Fixed {
                delay: std::time::Duration::from_millis(5),
            },
        );
        let template = TaskTemplate {
            name: "t".into(),
            namespace: "ns".into(),
            version: "1.0.0".into(),
            description: None,
            required_context: vec![],
            steps: vec![StepDefinition::new("a"), b],
        };
        let record =
            TaskRecord::from_template(&template, &TaskRequest::new("t", "ns", json!({}))).unwrap();
        let store = Arc::new(MemoryTaskStore::new());
        let id = store.insert_task(record).unwrap().task_uuid;
        (Orchestrator::new(store), id)
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .flat_map(|c| match c {
                CoreCommand::DispatchSteps(s) => s.iter().map(|d| d.step_name.clone()).collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    fn result(id: uuid::Uuid, step: &str, attempt: u32, outcome: HandlerOutcome) -> EngineEvent {
        EngineEvent::StepResult {
            task_uuid: id,
            step: step.into(),
            attempt,
            outcome,
        }
    }

    #[test]
    fn drives_task_to_completion_by_hand() {
        let (core, id) = setup();

        let s = core.step(EngineEvent::TaskCreated { task_uuid: id }).unwrap();
        assert_eq!(dispatched(&s), vec!["a"]);

        let s = core
            .step(result(id, "a", 1, HandlerOutcome::success(json!(1))))
            .unwrap();
        assert_eq!(dispatched(&s), vec!["b"]);

        let s = core
            .step(result(id, "b", 1, HandlerOutcome::success(json!(2))))
            .unwrap();
        assert!(matches!(
            s.commands.as_slice(),
            [CoreCommand::TaskFinished { status: TaskStatus::Complete, .. }]
        ));
    }

    #[test]
    fn retry_is_scheduled_then_redispatched() {
        let (core, id) = setup();
        core.step(EngineEvent::TaskCreated { task_uuid: id }).unwrap();
        core.step(result(id, "a", 1, HandlerOutcome::success(json!(1))))
            .unwrap();

        let s = core
            .step(result(
                id,
                "b",
                1,
                HandlerOutcome::Failure(StepFailure::retryable("flaky")),
            ))
            .unwrap();
        assert!(matches!(
            s.commands.as_slice(),
            [CoreCommand::ScheduleRetry { attempt: 1, .. }]
        ));

        let s = core
            .step(EngineEvent::RetryDue {
                task_uuid: id,
                step: "b".into(),
                attempt: 1,
            })
            .unwrap();
        assert_eq!(dispatched(&s), vec!["b"]);
    }

    #[test]
    fn duplicate_result_is_discarded() {
        let (core, id) = setup();
        core.step(EngineEvent::TaskCreated { task_uuid: id }).unwrap();
        let ev = result(id, "a", 1, HandlerOutcome::success(json!(1)));
        core.step(ev.clone()).unwrap();
        let s = core.step(ev).unwrap();
        assert!(s.commands.is_empty());
        assert!(s.keep_running);
    }

    #[test]
    fn unknown_task_does_not_stop_the_loop() {
        let (core, _) = setup();
        let s = core
            .step(EngineEvent::TaskCreated {
                task_uuid: uuid::Uuid::new_v4(),
            })
            .unwrap();
        assert!(s.keep_running);
        assert!(!core.step(EngineEvent::ShutdownRequested).unwrap().keep_running);
    }
}
