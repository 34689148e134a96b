use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use stepgraph::dag::DispatchedStep;
use stepgraph::errors::{Result, StepgraphError};
use stepgraph::exec::DispatchBackend;

/// A dispatch backend that:
/// - records every step it is handed
/// - never runs anything, so tests report results themselves
///
/// With `failing()`, every dispatch is rejected instead.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    dispatched: Arc<Mutex<Vec<DispatchedStep>>>,
    fail: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn dispatched(&self) -> Vec<DispatchedStep> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatched_names(&self) -> Vec<String> {
        self.dispatched()
            .into_iter()
            .map(|s| s.step_name)
            .collect()
    }
}

impl DispatchBackend for RecordingBackend {
    fn dispatch(
        &self,
        steps: Vec<DispatchedStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.fail {
                return Err(StepgraphError::StoreError(
                    "backend refused dispatch".to_string(),
                ));
            }
            self.dispatched.lock().unwrap().extend(steps);
            Ok(())
        })
    }
}
