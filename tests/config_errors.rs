// tests/config_errors.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use stepgraph::config::load_and_validate;
use stepgraph::engine::Backoff;
use stepgraph::errors::StepgraphError;
use stepgraph::types::StorageMode;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_dag_cycle_returns_template_error() {
    let file = config_file(
        r#"
[[template]]
name = "loop"

[[template.step]]
name = "A"
depends_on = ["B"]

[[template.step]]
name = "B"
depends_on = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(StepgraphError::TemplateError(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        other => panic!("expected TemplateError, got {other:?}"),
    }
}

#[test]
fn test_unknown_dependency_returns_template_error() {
    let file = config_file(
        r#"
[[template]]
name = "t"

[[template.step]]
name = "A"
depends_on = ["missing"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(StepgraphError::TemplateError(msg)) => assert!(msg.contains("missing")),
        other => panic!("expected TemplateError, got {other:?}"),
    }
}

#[test]
fn test_bad_duration_and_version_return_config_error() {
    let bad_delay = config_file(
        r#"
[engine.retry]
delay = "5 fortnights"

[[template]]
name = "t"
[[template.step]]
name = "A"
"#,
    );
    assert!(matches!(
        load_and_validate(bad_delay.path()),
        Err(StepgraphError::ConfigError(_))
    ));

    let bad_version = config_file(
        r#"
[[template]]
name = "t"
version = "v1"
[[template.step]]
name = "A"
"#,
    );
    assert!(matches!(
        load_and_validate(bad_version.path()),
        Err(StepgraphError::ConfigError(_))
    ));
}

#[test]
fn test_invalid_toml_returns_toml_error() {
    let file = config_file("[[template]\nname = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(StepgraphError::TomlError(_))
    ));
}

#[test]
fn test_full_config_is_loaded() {
    let file = config_file(
        r#"
[engine]
worker_concurrency = 2
scheduler_partitions = 3
storage = "file"
state_dir = "state"

[engine.retry]
max_attempts = 5
backoff = "exponential"
delay = "100ms"
max_delay = "2s"
factor = 3

[[template]]
name = "order_processing"
namespace = "ecommerce"
version = "1.2.0"
required_context = ["cart_items"]

[[template.step]]
name = "validate_cart"
cmd = "cat"

[[template.step]]
name = "charge"
handler = "payments"
depends_on = ["validate_cart"]
backoff = "fixed"
delay = "1s"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.engine.worker_concurrency, 2);
    assert_eq!(cfg.engine.scheduler_partitions, 3);
    assert_eq!(cfg.engine.storage, StorageMode::File);
    assert_eq!(cfg.engine.options().scheduler_partitions, 3);

    let t = &cfg.templates[0];
    assert_eq!(t.required_context, vec!["cart_items".to_string()]);

    let validate = t.step("validate_cart").unwrap();
    assert_eq!(validate.retry.max_attempts, 5);
    assert_eq!(
        validate.retry.backoff,
        Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 3,
            max: Duration::from_secs(2),
        }
    );

    let charge = t.step("charge").unwrap();
    assert_eq!(charge.handler, "payments");
    assert_eq!(charge.retry.max_attempts, 5);
    assert_eq!(
        charge.retry.backoff,
        Backoff::Fixed {
            delay: Duration::from_secs(1)
        }
    );
}
