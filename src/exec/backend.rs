// src/exec/backend.rs

//! Pluggable dispatch backend.
//!
//! The scheduler loops hand claimed steps to a `DispatchBackend` instead of
//! running handlers themselves. Production uses [`WorkerPoolBackend`]; tests
//! can plug in a backend that records steps and reports results by hand.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::task_info::DispatchedStep;
use crate::errors::{Result, StepgraphError};
use crate::events::EventLog;
use crate::registry::HandlerRegistry;

use super::executor_loop::spawn_worker_pool;

/// How claimed steps reach their handlers.
pub trait DispatchBackend: Send + Sync {
    /// Hand the given steps over for execution.
    ///
    /// Returning means the steps were accepted, not that they ran. Results
    /// come back later as `StepResult` events.
    fn dispatch(
        &self,
        steps: Vec<DispatchedStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Worker pool backend used in production.
pub struct WorkerPoolBackend {
    tx: mpsc::Sender<DispatchedStep>,
}

impl WorkerPoolBackend {
    /// Spawn the worker pool immediately.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        events: EventLog,
        concurrency: usize,
        capacity: usize,
    ) -> Self {
        let tx = spawn_worker_pool(registry, events, concurrency, capacity);
        Self { tx }
    }
}

impl DispatchBackend for WorkerPoolBackend {
    fn dispatch(
        &self,
        steps: Vec<DispatchedStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for step in steps {
                tx.send(step).await.map_err(|e| {
                    StepgraphError::StoreError(format!(
                        "worker pool is gone; could not dispatch step '{}'",
                        e.0.step_name
                    ))
                })?;
            }
            Ok(())
        })
    }
}
