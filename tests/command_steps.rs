// tests/command_steps.rs
#![cfg(unix)]

mod common;

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use stepgraph::config::load_and_validate;
use stepgraph::dag::TaskRequest;
use stepgraph::engine::{Engine, TemplateCatalog};
use stepgraph::registry::HandlerRegistry;
use stepgraph::store::{MemoryTaskStore, TaskStore};
use stepgraph::types::{ErrorKind, StepState, TaskStatus};
use tempfile::NamedTempFile;

use common::{init_tracing, wait_done, TestResult};

const CONFIG: &str = r#"
[engine.retry]
max_attempts = 2
backoff = "fixed"
delay = "10ms"

[[template]]
name = "shell"

[[template.step]]
name = "emit"
cmd = "echo '{\"total\": 12}'"

[[template.step]]
name = "inspect"
depends_on = ["emit"]
cmd = "cat"

[[template.step]]
name = "env"
depends_on = ["emit"]
cmd = "printf '%s/%s' \"$STEPGRAPH_STEP\" \"$STEPGRAPH_ATTEMPT\""

[[template]]
name = "flaky"

[[template.step]]
name = "tempfail"
cmd = "echo 'try later' >&2; exit 75"

[[template]]
name = "broken"

[[template.step]]
name = "bad_input"
cmd = "exit 65"

[[template.step]]
name = "never"
depends_on = ["bad_input"]
cmd = "echo unreachable"
"#;

fn engine() -> Engine {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{CONFIG}").unwrap();
    let cfg = load_and_validate(file.path()).unwrap();

    let registry = HandlerRegistry::builder()
        .with_command_steps(&cfg.templates)
        .build();
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let catalog = TemplateCatalog::from_templates(cfg.templates.clone()).unwrap();
    Engine::start(cfg.engine.options(), catalog, registry, store)
}

#[tokio::test]
async fn command_steps_exchange_json() -> TestResult {
    init_tracing();
    let engine = engine();

    let task = engine
        .create_task(TaskRequest::new("shell", "default", json!({"order": 7})))?
        .task_uuid;
    let snap = wait_done(&engine, task).await;
    assert_eq!(snap.status, TaskStatus::Complete);

    assert_eq!(snap.step("emit").unwrap().result, Some(json!({"total": 12})));

    // `cat` echoes the inputs document it received on stdin.
    let inspect = snap.step("inspect").unwrap().result.clone().unwrap();
    assert_eq!(inspect["step_name"], json!("inspect"));
    assert_eq!(inspect["context"], json!({"order": 7}));
    assert_eq!(inspect["dependency_results"]["emit"], json!({"total": 12}));

    assert_eq!(snap.step("env").unwrap().result, Some(json!("env/1")));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn exit_codes_drive_retry_and_failure() -> TestResult {
    init_tracing();
    let engine = engine();

    let flaky = engine
        .create_task(TaskRequest::new("flaky", "default", json!({})))?
        .task_uuid;
    let broken = engine
        .create_task(TaskRequest::new("broken", "default", json!({})))?
        .task_uuid;

    let snap = wait_done(&engine, flaky).await;
    assert_eq!(snap.status, TaskStatus::BlockedByFailures);
    let step = snap.step("tempfail").unwrap();
    assert_eq!(step.attempts, 2);
    let err = step.error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::Retryable);
    assert_eq!(err.error_code.as_deref(), Some("exit_75"));
    assert!(err.message.contains("try later"));

    let snap = wait_done(&engine, broken).await;
    assert_eq!(snap.status, TaskStatus::BlockedByFailures);
    let step = snap.step("bad_input").unwrap();
    assert_eq!(step.attempts, 1);
    assert_eq!(step.error.as_ref().unwrap().kind, ErrorKind::Validation);
    assert_eq!(snap.step("never").unwrap().current_state, StepState::Blocked);

    engine.shutdown().await?;
    Ok(())
}
