// src/engine/handle.rs

//! The engine's public API: create tasks, read them back, cancel, shut down.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::task_info::{TaskCreated, TaskRecord, TaskRequest, TaskSnapshot};
use crate::engine::catalog::TemplateCatalog;
use crate::engine::core::Orchestrator;
use crate::engine::runtime::Runtime;
use crate::errors::{Result, StepgraphError};
use crate::events::{EngineEvent, EventLog};
use crate::exec::{DispatchBackend, WorkerPoolBackend};
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;

/// Sizing knobs for a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum number of handlers running at once.
    pub worker_concurrency: usize,
    /// Capacity of the queue between scheduler loops and workers.
    pub event_buffer: usize,
    /// Number of scheduler loops; tasks are partitioned across them.
    pub scheduler_partitions: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 8,
            event_buffer: 64,
            scheduler_partitions: 1,
        }
    }
}

/// A running orchestration engine.
///
/// Must be started inside a Tokio runtime.
pub struct Engine {
    catalog: Arc<TemplateCatalog>,
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn TaskStore>,
    events: EventLog,
    loops: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine that runs handlers on its own worker pool.
    pub fn start(
        options: EngineOptions,
        catalog: TemplateCatalog,
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let events = EventLog::new();
        let backend = Arc::new(WorkerPoolBackend::new(
            registry.clone(),
            events.clone(),
            options.worker_concurrency,
            options.event_buffer,
        ));
        Self::start_with_backend(options, catalog, registry, store, events, backend)
    }

    /// Start an engine with a caller-supplied dispatch backend and event log.
    ///
    /// Unfinished tasks already in `store` (for example reloaded from disk)
    /// are recovered and driven again.
    pub fn start_with_backend(
        options: EngineOptions,
        catalog: TemplateCatalog,
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn TaskStore>,
        events: EventLog,
        backend: Arc<dyn DispatchBackend>,
    ) -> Self {
        let partitions = options.scheduler_partitions.max(1);
        let loops = (0..partitions)
            .map(|index| {
                let runtime = Runtime::new(
                    Orchestrator::new(store.clone()),
                    events.clone(),
                    backend.clone(),
                    index,
                    partitions,
                );
                tokio::spawn(runtime.run())
            })
            .collect();

        let resumed = resume_unfinished(store.as_ref(), &events);
        info!(
            partitions,
            workers = options.worker_concurrency,
            templates = catalog.len(),
            handlers = registry.len(),
            resumed,
            "engine started"
        );

        Self {
            catalog: Arc::new(catalog),
            registry,
            store,
            events,
            loops,
        }
    }

    /// Instantiate a template and queue its root steps.
    ///
    /// Fails synchronously, with nothing persisted, on:
    /// - `ValidationError`: context is not an object or misses required keys
    /// - `TemplateError`: unknown template/version, bad graph, or a step
    ///   whose handler is not registered
    pub fn create_task(&self, request: TaskRequest) -> Result<TaskCreated> {
        let template =
            self.catalog
                .resolve(&request.namespace, &request.name, request.version.as_deref())?;

        let record = TaskRecord::from_template(template, &request)?;

        let missing: Vec<&str> = template
            .steps
            .iter()
            .filter(|s| !self.registry.contains(&template.namespace, &s.handler))
            .map(|s| s.handler.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(StepgraphError::TemplateError(format!(
                "template '{}' in namespace '{}' references unregistered handler(s): {}",
                template.name,
                template.namespace,
                missing.join(", ")
            )));
        }

        let snapshot = self.store.insert_task(record)?;
        info!(
            task = %snapshot.task_uuid,
            name = %snapshot.name,
            namespace = %snapshot.namespace,
            version = %snapshot.version,
            steps = snapshot.total_steps,
            initiator = %snapshot.initiator,
            "task created"
        );
        self.events.publish(EngineEvent::TaskCreated {
            task_uuid: snapshot.task_uuid,
        });

        Ok(TaskCreated {
            task_uuid: snapshot.task_uuid,
            status: snapshot.status,
        })
    }

    pub fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.store.get_task(task_uuid)
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskSnapshot>> {
        self.store.list_tasks()
    }

    /// Cancel a task. Takes effect immediately; results still in flight are
    /// discarded when they arrive. A no-op on terminal tasks.
    pub fn cancel_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        let snapshot = self.store.cancel_task(task_uuid)?;
        self.events.publish(EngineEvent::CancelRequested { task_uuid });
        Ok(snapshot)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Stop every scheduler loop and close the event log.
    ///
    /// Handlers already running are not interrupted, but their results are
    /// no longer applied.
    pub async fn shutdown(self) -> Result<()> {
        self.events.publish(EngineEvent::ShutdownRequested);
        let mut first_error = None;
        for handle in self.loops {
            match handle.await {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "scheduler loop panicked");
                    first_error.get_or_insert(StepgraphError::Other(anyhow::anyhow!(
                        "scheduler loop panicked: {e}"
                    )));
                }
            }
        }
        self.events.close();
        debug!("engine stopped");
        first_error.map_or(Ok(()), Err)
    }
}

/// Recover and re-publish every non-terminal task in the store. Returns how
/// many were resumed.
fn resume_unfinished(store: &dyn TaskStore, events: &EventLog) -> usize {
    let tasks = match store.list_tasks() {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "could not list stored tasks; nothing resumed");
            return 0;
        }
    };

    let mut resumed = 0;
    for task in tasks.into_iter().filter(|t| !t.status.is_terminal()) {
        let task_uuid = task.task_uuid;
        match store.recover_task(task_uuid) {
            Ok(snapshot) if snapshot.status.is_terminal() => {
                info!(task = %task_uuid, status = %snapshot.status, "stored task finished during recovery");
            }
            Ok(_) => {
                debug!(task = %task_uuid, "resuming stored task");
                events.publish(EngineEvent::TaskCreated { task_uuid });
                resumed += 1;
            }
            Err(e) => {
                warn!(task = %task_uuid, error = %e, "could not resume stored task");
                if let Err(e) = store.fail_task(task_uuid, &format!("could not resume after restart: {e}")) {
                    warn!(task = %task_uuid, error = %e, "could not record resume failure");
                }
            }
        }
    }
    resumed
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("templates", &self.catalog.len())
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("events", &self.events)
            .field("loops", &self.loops.len())
            .finish()
    }
}
