#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stepgraph::client::{wait_for_completion, PollOptions};
use stepgraph::dag::{TaskSnapshot, TaskTemplate};
use stepgraph::engine::{Engine, EngineOptions, TemplateCatalog};
use stepgraph::registry::HandlerRegistry;
use stepgraph::store::{MemoryTaskStore, TaskStore};
use uuid::Uuid;

pub use stepgraph_test_utils::init_tracing;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Start an engine over an in-memory store.
pub fn start_engine(templates: Vec<TaskTemplate>, registry: Arc<HandlerRegistry>) -> Engine {
    start_engine_with(templates, registry, EngineOptions::default())
}

pub fn start_engine_with(
    templates: Vec<TaskTemplate>,
    registry: Arc<HandlerRegistry>,
    options: EngineOptions,
) -> Engine {
    let catalog = TemplateCatalog::from_templates(templates).expect("templates are valid");
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    Engine::start(options, catalog, registry, store)
}

/// Poll until the task is terminal, accepting `blocked_by_failures` at once.
pub async fn wait_done(engine: &Engine, task_uuid: Uuid) -> TaskSnapshot {
    let options = PollOptions {
        interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        failure_grace: Duration::ZERO,
    };
    wait_for_completion(engine, task_uuid, options)
        .await
        .expect("task did not finish in time")
}
