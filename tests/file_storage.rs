// tests/file_storage.rs

mod common;

use std::sync::Arc;

use serde_json::json;
use stepgraph::dag::{TaskFault, TaskRecord, TaskRequest, TaskTemplate};
use stepgraph::engine::{Engine, EngineOptions, TemplateCatalog};
use stepgraph::events::EngineEvent;
use stepgraph::fs::mock::MockFileSystem;
use stepgraph::fs::RealFileSystem;
use stepgraph::registry::HandlerRegistry;
use stepgraph::store::{MemoryTaskStore, TaskStore};
use stepgraph::types::{StepState, TaskStatus};
use stepgraph_test_utils::builders::TemplateBuilder;
use tempfile::TempDir;

use common::{init_tracing, wait_done, TestResult};

#[tokio::test]
async fn completed_tasks_survive_a_store_restart() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;

    let template = TemplateBuilder::new("etl")
        .step("extract", &[])
        .step("load", &["extract"])
        .build();
    let registry = HandlerRegistry::builder()
        .register_fn("default", "extract", |_| Ok(json!({"rows": 3})))
        .register_fn("default", "load", |inputs| {
            let upstream: serde_json::Value = inputs.dependency("extract")?;
            Ok(json!({ "loaded": upstream["rows"] }))
        })
        .build();

    let store: Arc<dyn TaskStore> =
        Arc::new(MemoryTaskStore::with_persistence(Arc::new(RealFileSystem), dir.path())?);
    let engine = Engine::start(
        EngineOptions::default(),
        TemplateCatalog::from_templates([template])?,
        registry,
        store,
    );

    let task = engine
        .create_task(TaskRequest::new("etl", "default", json!({"day": "2024-01-01"})))?
        .task_uuid;
    let before = wait_done(&engine, task).await;
    assert_eq!(before.status, TaskStatus::Complete);
    engine.shutdown().await?;

    let file = dir.path().join("tasks").join(format!("{task}.json"));
    assert!(file.exists(), "missing {}", file.display());

    let reopened = MemoryTaskStore::with_persistence(Arc::new(RealFileSystem), dir.path())?;
    assert_eq!(reopened.len(), 1);
    let after = reopened.get_task(task)?;
    assert_eq!(after.status, TaskStatus::Complete);
    assert_eq!(after.context, json!({"day": "2024-01-01"}));
    assert_eq!(after.step("load").unwrap().result, Some(json!({"loaded": 3})));
    assert_eq!(after.step("extract").unwrap().current_state, StepState::Complete);
    assert_eq!(after.steps, before.steps);

    Ok(())
}

#[test]
fn unreadable_task_files_are_skipped() -> TestResult {
    let dir = TempDir::new()?;
    let tasks = dir.path().join("tasks");
    std::fs::create_dir_all(&tasks)?;
    std::fs::write(tasks.join("garbage.json"), "{ not json")?;
    std::fs::write(tasks.join("notes.txt"), "ignored")?;

    let store = MemoryTaskStore::with_persistence(Arc::new(RealFileSystem), dir.path())?;
    assert!(store.is_empty());
    Ok(())
}

fn etl_template() -> TaskTemplate {
    TemplateBuilder::new("etl")
        .step("extract", &[])
        .step("load", &["extract"])
        .build()
}

fn etl_registry() -> Arc<HandlerRegistry> {
    HandlerRegistry::builder()
        .register_fn("default", "extract", |_| Ok(json!({"rows": 3})))
        .register_fn("default", "load", |_| Ok(json!("done")))
        .build()
}

fn etl_record(template: &TaskTemplate) -> TaskRecord {
    TaskRecord::from_template(template, &TaskRequest::new("etl", "default", json!({})))
        .expect("template is valid")
}

#[tokio::test]
async fn write_failure_moves_task_to_error_and_engine_keeps_going() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    let template = etl_template();
    let store: Arc<dyn TaskStore> =
        Arc::new(MemoryTaskStore::with_persistence(fs.clone(), "state")?);
    let engine = Engine::start(
        EngineOptions::default(),
        TemplateCatalog::from_templates([template.clone()])?,
        etl_registry(),
        store.clone(),
    );

    // Stored while the disk works; the first claim then fails to persist.
    let doomed = store.insert_task(etl_record(&template))?.task_uuid;
    fs.set_fail_writes(true);
    engine.events().publish(EngineEvent::TaskCreated { task_uuid: doomed });

    let failed = wait_done(&engine, doomed).await;
    assert_eq!(failed.status, TaskStatus::Error);
    match &failed.fault {
        Some(TaskFault::EngineError { message, .. }) => {
            assert!(message.contains("failed to persist"), "{message}");
        }
        other => panic!("expected an engine fault, got {other:?}"),
    }
    assert_eq!(failed.step("extract").unwrap().current_state, StepState::Pending);

    fs.set_fail_writes(false);
    let healthy = engine
        .create_task(TaskRequest::new("etl", "default", json!({})))?
        .task_uuid;
    assert_eq!(wait_done(&engine, healthy).await.status, TaskStatus::Complete);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn unfinished_tasks_resume_when_the_engine_restarts() -> TestResult {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    let template = etl_template();

    // A previous run stored one untouched task and crashed mid-attempt on
    // another.
    let (untouched, interrupted) = {
        let store = MemoryTaskStore::with_persistence(fs.clone(), "state")?;
        let untouched = store.insert_task(etl_record(&template))?.task_uuid;
        let interrupted = store.insert_task(etl_record(&template))?.task_uuid;
        store.claim_ready_steps(interrupted)?;
        (untouched, interrupted)
    };

    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::with_persistence(fs, "state")?);
    let engine = Engine::start(
        EngineOptions::default(),
        TemplateCatalog::from_templates([template])?,
        etl_registry(),
        store,
    );

    let first = wait_done(&engine, untouched).await;
    assert_eq!(first.status, TaskStatus::Complete);
    assert_eq!(first.step("extract").unwrap().attempts, 1);

    let second = wait_done(&engine, interrupted).await;
    assert_eq!(second.status, TaskStatus::Complete);
    let extract = second.step("extract").unwrap();
    assert_eq!(extract.attempts, 2);
    assert_eq!(
        extract.error_history[0].error_code.as_deref(),
        Some("interrupted")
    );
    assert_eq!(second.step("load").unwrap().result, Some(json!("done")));

    engine.shutdown().await?;
    Ok(())
}
