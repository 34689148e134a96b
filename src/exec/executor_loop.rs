// src/exec/executor_loop.rs

//! Bounded worker pool that runs dispatched steps.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::dag::task_info::DispatchedStep;
use crate::events::EventLog;
use crate::exec::step_runner::run_step;
use crate::registry::HandlerRegistry;

/// Spawn the background worker loop.
///
/// The returned sender is what [`WorkerPoolBackend`](super::WorkerPoolBackend)
/// forwards dispatched steps into. Each step runs in its own Tokio task, with
/// at most `concurrency` handlers in flight at once. `capacity` bounds the
/// queue of steps waiting for a worker.
pub fn spawn_worker_pool(
    registry: Arc<HandlerRegistry>,
    events: EventLog,
    concurrency: usize,
    capacity: usize,
) -> mpsc::Sender<DispatchedStep> {
    let (tx, mut rx) = mpsc::channel::<DispatchedStep>(capacity.max(1));
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        info!(concurrency, "worker pool started");

        while let Some(step) = rx.recv().await {
            let permit = match permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    warn!("worker semaphore closed; dropping dispatched step");
                    break;
                }
            };

            let registry = registry.clone();
            let events = events.clone();
            debug!(task = %step.task_uuid, step = %step.step_name, attempt = step.attempt, "worker picked up step");
            tokio::spawn(async move {
                run_step(step, registry, events).await;
                drop(permit);
            });
        }

        info!("worker pool finished (channel closed)");
    });

    tx
}
