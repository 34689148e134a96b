// tests/create_task.rs

mod common;

use serde_json::json;
use stepgraph::dag::TaskRequest;
use stepgraph::errors::StepgraphError;
use stepgraph::registry::HandlerRegistry;
use stepgraph::types::TaskStatus;
use stepgraph_test_utils::builders::TemplateBuilder;

use common::{init_tracing, start_engine, wait_done, TestResult};

fn order_template(version: &str) -> stepgraph::dag::TaskTemplate {
    TemplateBuilder::new("order_processing")
        .namespace("ecommerce")
        .version(version)
        .requires("cart_items")
        .requires("customer_id")
        .step("validate_cart", &[])
        .build()
}

fn registry() -> std::sync::Arc<HandlerRegistry> {
    HandlerRegistry::builder()
        .register_fn("ecommerce", "validate_cart", |inputs| {
            let customer: u64 = inputs.context_field("customer_id")?;
            Ok(json!({ "template_ok": true, "customer": customer }))
        })
        .build()
}

#[tokio::test]
async fn rejects_context_problems_without_persisting() -> TestResult {
    init_tracing();
    let engine = start_engine(vec![order_template("1.0.0")], registry());

    let missing = engine
        .create_task(TaskRequest::new("order_processing", "ecommerce", json!({"cart_items": []})))
        .unwrap_err();
    assert!(
        matches!(&missing, StepgraphError::ValidationError(m) if m.contains("customer_id")),
        "{missing}"
    );

    let null_value = engine
        .create_task(TaskRequest::new(
            "order_processing",
            "ecommerce",
            json!({"cart_items": [], "customer_id": null}),
        ))
        .unwrap_err();
    assert!(matches!(null_value, StepgraphError::ValidationError(_)));

    let not_object = engine
        .create_task(TaskRequest::new("order_processing", "ecommerce", json!([1, 2])))
        .unwrap_err();
    assert!(matches!(not_object, StepgraphError::ValidationError(_)));

    assert!(engine.list_tasks()?.is_empty());
    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn rejects_unknown_templates_and_versions() -> TestResult {
    init_tracing();
    let engine = start_engine(vec![order_template("1.0.0")], registry());
    let ctx = json!({"cart_items": [], "customer_id": 7});

    let wrong_ns = engine
        .create_task(TaskRequest::new("order_processing", "billing", ctx.clone()))
        .unwrap_err();
    assert!(matches!(wrong_ns, StepgraphError::TemplateError(_)));

    let mut request = TaskRequest::new("order_processing", "ecommerce", ctx.clone());
    request.version = Some("9.9.9".into());
    assert!(matches!(
        engine.create_task(request).unwrap_err(),
        StepgraphError::TemplateError(_)
    ));

    let mut request = TaskRequest::new("order_processing", "ecommerce", ctx);
    request.version = Some("not-a-version".into());
    assert!(matches!(
        engine.create_task(request).unwrap_err(),
        StepgraphError::ValidationError(_)
    ));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn rejects_templates_with_unregistered_handlers() -> TestResult {
    init_tracing();
    let template = TemplateBuilder::new("orphan")
        .namespace("ecommerce")
        .step("validate_cart", &[])
        .step("ship", &["validate_cart"])
        .build();
    let engine = start_engine(vec![template], registry());

    let err = engine
        .create_task(TaskRequest::new("orphan", "ecommerce", json!({})))
        .unwrap_err();
    assert!(matches!(&err, StepgraphError::TemplateError(m) if m.contains("ship")), "{err}");
    assert!(engine.list_tasks()?.is_empty());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn latest_version_is_used_unless_pinned() -> TestResult {
    init_tracing();
    let engine = start_engine(
        vec![order_template("1.2.0"), order_template("1.10.0"), order_template("1.9.3")],
        registry(),
    );
    let ctx = json!({"cart_items": ["sku-1"], "customer_id": 42});

    let latest = engine.create_task(TaskRequest::new("order_processing", "ecommerce", ctx.clone()))?;
    assert_eq!(latest.status, TaskStatus::Pending);
    let snap = wait_done(&engine, latest.task_uuid).await;
    assert_eq!(snap.version, "1.10.0");
    assert_eq!(snap.status, TaskStatus::Complete);
    assert_eq!(
        snap.step("validate_cart").unwrap().result,
        Some(json!({ "template_ok": true, "customer": 42 }))
    );

    let mut pinned = TaskRequest::new("order_processing", "ecommerce", ctx);
    pinned.version = Some("1.2.0".into());
    pinned.initiator = "billing-service".into();
    pinned.reason = "backfill".into();
    let created = engine.create_task(pinned)?;
    let snap = engine.get_task(created.task_uuid)?;
    assert_eq!(snap.version, "1.2.0");
    assert_eq!(snap.initiator, "billing-service");
    assert_eq!(snap.reason, "backfill");

    engine.shutdown().await?;
    Ok(())
}

#[test]
fn catalog_rejects_cyclic_and_duplicate_templates() {
    use stepgraph::engine::TemplateCatalog;

    let cyclic = TemplateBuilder::new("loop")
        .step("a", &["b"])
        .step("b", &["a"])
        .build();
    assert!(matches!(
        TemplateCatalog::from_templates([cyclic]).unwrap_err(),
        StepgraphError::TemplateError(_)
    ));

    let dup = || TemplateBuilder::new("same").step("a", &[]).build();
    assert!(TemplateCatalog::from_templates([dup(), dup()]).is_err());

    let unknown_dep = TemplateBuilder::new("dangling").step("a", &["ghost"]).build();
    assert!(TemplateCatalog::from_templates([unknown_dep]).is_err());
}
