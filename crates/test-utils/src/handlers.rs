//! Fake step handlers that record what they were asked to do.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use stepgraph::registry::{HandlerFuture, HandlerOutcome, StepFailure, StepHandler, StepInputs};

/// One recorded handler invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub step: String,
    pub attempt: u32,
    pub context: Value,
    pub dependency_results: BTreeMap<String, Value>,
}

/// Shared journal of handler invocations, in start order, plus a
/// high-water mark of concurrently running handlers.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
    finished: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Step names in the order their handlers started.
    pub fn started(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.step).collect()
    }

    /// Step names in the order their handlers returned.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn calls_for(&self, step: &str) -> usize {
        self.calls().iter().filter(|c| c.step == step).count()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn enter(&self, inputs: &StepInputs) {
        self.calls.lock().unwrap().push(Call {
            step: inputs.step_name.clone(),
            attempt: inputs.attempt,
            context: inputs.context.clone(),
            dependency_results: inputs.dependency_results.clone(),
        });
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, step: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(step.to_string());
    }
}

/// Succeeds with `{"step": <name>, "attempt": <n>}` after an optional delay.
pub struct RecordingHandler {
    name: String,
    journal: Journal,
    delay: Duration,
}

impl RecordingHandler {
    pub fn new(name: &str, journal: Journal) -> Arc<Self> {
        Self::delayed(name, journal, Duration::ZERO)
    }

    pub fn delayed(name: &str, journal: Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal,
            delay,
        })
    }
}

impl StepHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, inputs: &'a StepInputs) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.journal.enter(inputs);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.journal.exit(&inputs.step_name);
            HandlerOutcome::success(json!({
                "step": inputs.step_name,
                "attempt": inputs.attempt,
            }))
        })
    }
}

/// Plays back a fixed list of outcomes, repeating the last one forever.
pub struct ScriptedHandler {
    name: String,
    journal: Journal,
    script: Mutex<VecDeque<Result<Value, StepFailure>>>,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(name: &str, journal: Journal, script: Vec<Result<Value, StepFailure>>) -> Arc<Self> {
        assert!(!script.is_empty(), "script needs at least one outcome");
        Arc::new(Self {
            name: name.to_string(),
            journal,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Fails with a retryable error on every attempt.
    pub fn always_retryable(name: &str, journal: Journal) -> Arc<Self> {
        Self::new(name, journal, vec![Err(StepFailure::retryable("still broken"))])
    }

    /// Fails with a permanent error on every attempt.
    pub fn always_permanent(name: &str, journal: Journal) -> Arc<Self> {
        Self::new(name, journal, vec![Err(StepFailure::permanent("card declined"))])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<Value, StepFailure> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script[0].clone()
        }
    }
}

impl StepHandler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, inputs: &'a StepInputs) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.journal.enter(inputs);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.next_outcome();
            self.journal.exit(&inputs.step_name);
            HandlerOutcome::from(outcome)
        })
    }
}
