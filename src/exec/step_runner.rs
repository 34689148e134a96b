// src/exec/step_runner.rs

//! Runs one dispatched step and reports its outcome as an event.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dag::task_info::DispatchedStep;
use crate::events::{EngineEvent, EventLog};
use crate::registry::{HandlerOutcome, HandlerRegistry, StepFailure, StepInputs};

/// Invoke the handler for `step` and publish a `StepResult`.
///
/// Nothing escapes this function: a missing handler, a panic or a timeout
/// inside the handler all become failure outcomes.
pub async fn run_step(step: DispatchedStep, registry: Arc<HandlerRegistry>, events: EventLog) {
    let outcome = invoke(&step, &registry).await;

    match &outcome {
        HandlerOutcome::Success { .. } => {
            info!(task = %step.task_uuid, step = %step.step_name, attempt = step.attempt, "step succeeded");
        }
        HandlerOutcome::Failure(f) => {
            warn!(
                task = %step.task_uuid,
                step = %step.step_name,
                attempt = step.attempt,
                kind = %f.kind,
                error = %f.message,
                "step handler reported failure"
            );
        }
    }

    events.publish(EngineEvent::StepResult {
        task_uuid: step.task_uuid,
        step: step.step_name,
        attempt: step.attempt,
        outcome,
    });
}

async fn invoke(step: &DispatchedStep, registry: &HandlerRegistry) -> HandlerOutcome {
    let Some(handler) = registry.get(&step.namespace, &step.handler) else {
        error!(
            task = %step.task_uuid,
            step = %step.step_name,
            handler = %step.handler,
            namespace = %step.namespace,
            "no handler registered"
        );
        return HandlerOutcome::Failure(
            StepFailure::permanent(format!(
                "no handler '{}' registered in namespace '{}'",
                step.handler, step.namespace
            ))
            .with_code("handler_not_found"),
        );
    };

    debug!(
        task = %step.task_uuid,
        step = %step.step_name,
        handler = handler.name(),
        attempt = step.attempt,
        "invoking handler"
    );

    let inputs = StepInputs::from(step);
    let mut join = tokio::spawn(async move { handler.call(&inputs).await });

    let joined = match step.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut join).await {
            Ok(joined) => joined,
            Err(_) => {
                join.abort();
                return HandlerOutcome::Failure(timed_out(limit));
            }
        },
        None => join.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(task = %step.task_uuid, step = %step.step_name, "step handler panicked");
            HandlerOutcome::Failure(
                StepFailure::handler(format!("handler panicked: {}", panic_message(e)))
                    .with_code("panic"),
            )
        }
        Err(e) => HandlerOutcome::Failure(StepFailure::handler(format!("handler aborted: {e}"))),
    }
}

fn timed_out(limit: Duration) -> StepFailure {
    StepFailure::handler(format!("handler timed out after {limit:?}")).with_code("timeout")
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
