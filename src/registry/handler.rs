// src/registry/handler.rs

//! The handler contract: what a step receives and what it reports back.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dag::task_info::DispatchedStep;
use crate::types::{ErrorKind, StepName};

/// Inputs delivered to a handler for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInputs {
    pub task_uuid: Uuid,
    pub step_name: StepName,
    pub namespace: String,
    pub attempt: u32,
    pub context: Value,
    /// Results of every completed ancestor step.
    pub dependency_results: BTreeMap<StepName, Value>,
}

impl StepInputs {
    /// Typed access to a context field.
    ///
    /// Missing or malformed fields become a `Validation` failure, which is
    /// never retried.
    pub fn context_field<T: DeserializeOwned>(&self, key: &str) -> Result<T, StepFailure> {
        let raw = self
            .context
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| StepFailure::validation(format!("missing context field '{key}'")))?;
        serde_json::from_value(raw.clone()).map_err(|e| {
            StepFailure::validation(format!("context field '{key}' is malformed: {e}"))
        })
    }

    /// Typed access to the result of a completed ancestor step.
    pub fn dependency<T: DeserializeOwned>(&self, step: &str) -> Result<T, StepFailure> {
        let raw = self.dependency_results.get(step).ok_or_else(|| {
            StepFailure::validation(format!("no result available from step '{step}'"))
        })?;
        serde_json::from_value(raw.clone()).map_err(|e| {
            StepFailure::validation(format!("result of step '{step}' is malformed: {e}"))
        })
    }
}

impl From<&DispatchedStep> for StepInputs {
    fn from(d: &DispatchedStep) -> Self {
        Self {
            task_uuid: d.task_uuid,
            step_name: d.step_name.clone(),
            namespace: d.namespace.clone(),
            attempt: d.attempt,
            context: d.context.clone(),
            dependency_results: d.dependency_results.clone(),
        }
    }
}

/// A handler-level failure. Reported as a value, never as an `Err` across
/// the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub error_code: Option<String>,
}

impl StepFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            retryable: kind.allows_retry(),
            error_code: None,
        }
    }

    /// Bad input; never retried.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Business rule violation; never retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Transient failure; retried per the step's policy.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    /// Unexpected handler error (panic, timeout, spawn failure).
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Whether the engine may retry this failure. `Validation` and
    /// `Permanent` failures never are, whatever the flag says.
    pub fn is_retryable(&self) -> bool {
        self.retryable && self.kind.allows_retry()
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        if let Some(code) = &self.error_code {
            write!(f, " [{code}]")?;
        }
        Ok(())
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    Success {
        result: Value,
        metadata: Option<Value>,
    },
    Failure(StepFailure),
}

impl HandlerOutcome {
    pub fn success(result: Value) -> Self {
        HandlerOutcome::Success {
            result,
            metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success { .. })
    }
}

impl From<Result<Value, StepFailure>> for HandlerOutcome {
    fn from(r: Result<Value, StepFailure>) -> Self {
        match r {
            Ok(result) => HandlerOutcome::success(result),
            Err(failure) => HandlerOutcome::Failure(failure),
        }
    }
}

/// Boxed future returned by [`StepHandler::call`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerOutcome> + Send + 'a>>;

/// An executable capability bound to a (namespace, handler name) pair.
pub trait StepHandler: Send + Sync {
    /// Human-readable identifier used in logs.
    fn name(&self) -> &str;

    fn call<'a>(&'a self, inputs: &'a StepInputs) -> HandlerFuture<'a>;
}

/// Adapts a synchronous closure into a [`StepHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&StepInputs) -> Result<Value, StepFailure> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&StepInputs) -> Result<Value, StepFailure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, inputs: &'a StepInputs) -> HandlerFuture<'a> {
        let outcome = HandlerOutcome::from((self.func)(inputs));
        Box::pin(async move { outcome })
    }
}
