// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod registry;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::client::{PollOptions, wait_for_completion};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::task_info::{TaskRequest, TaskSnapshot};
use crate::engine::{Engine, TemplateCatalog};
use crate::fs::RealFileSystem;
use crate::registry::HandlerRegistry;
use crate::store::{MemoryTaskStore, TaskStore};
use crate::types::{StorageMode, TaskStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - handler registry (one command handler per `cmd` step)
/// - task store and engine
/// - creating one task and waiting for it
/// - Ctrl-C handling (cancels the task)
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let template_name = select_template(&cfg, &args)?;
    let context = read_context(&args)?;

    let registry = HandlerRegistry::builder()
        .with_command_steps(&cfg.templates)
        .build();

    let store: Arc<dyn TaskStore> = match cfg.engine.storage {
        StorageMode::Memory => Arc::new(MemoryTaskStore::new()),
        StorageMode::File => {
            let state_dir = config_root_dir(&config_path).join(&cfg.engine.state_dir);
            info!(state_dir = %state_dir.display(), "using file-backed task store");
            Arc::new(MemoryTaskStore::with_persistence(
                Arc::new(RealFileSystem),
                state_dir,
            )?)
        }
    };

    let catalog = TemplateCatalog::from_templates(cfg.templates.iter().cloned())?;
    let engine = Engine::start(cfg.engine.options(), catalog, registry, store);

    let mut request = TaskRequest::new(template_name, args.namespace.clone(), context);
    request.version = args.template_version.clone();
    request.initiator = args.initiator.clone();
    request.source_system = "stepgraph-cli".to_string();
    request.reason = args.reason.clone();

    let created = match engine.create_task(request) {
        Ok(created) => created,
        Err(e) => {
            engine.shutdown().await?;
            return Err(e.into());
        }
    };
    info!(task = %created.task_uuid, "waiting for task to finish");

    let poll = PollOptions {
        timeout: args.timeout,
        failure_grace: args.grace,
        ..PollOptions::default()
    };

    let outcome = tokio::select! {
        res = wait_for_completion(&engine, created.task_uuid, poll) => res.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            warn!(task = %created.task_uuid, "interrupted; cancelling task");
            engine.cancel_task(created.task_uuid).map_err(anyhow::Error::from)
        }
    };

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(e) => {
            engine.shutdown().await?;
            return Err(e);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }

    engine.shutdown().await?;

    if snapshot.status != TaskStatus::Complete {
        bail!(
            "task {} finished with status {}",
            snapshot.task_uuid,
            snapshot.status
        );
    }
    Ok(())
}

/// `--template`, or the only template in `--namespace` when there is just one.
fn select_template(cfg: &ConfigFile, args: &CliArgs) -> Result<String> {
    if let Some(name) = &args.template {
        return Ok(name.clone());
    }

    let mut names: Vec<&str> = cfg
        .templates
        .iter()
        .filter(|t| t.namespace == args.namespace)
        .map(|t| t.name.as_str())
        .collect();
    names.sort_unstable();
    names.dedup();

    match names.as_slice() {
        [only] => Ok(only.to_string()),
        [] => bail!("no templates in namespace '{}'", args.namespace),
        many => bail!(
            "namespace '{}' has several templates ({}); pick one with --template",
            args.namespace,
            many.join(", ")
        ),
    }
}

/// Task context from `--context`, `--context-file`, or an empty object.
fn read_context(args: &CliArgs) -> Result<Value> {
    let context = match (&args.context, &args.context_file) {
        (Some(inline), _) => serde_json::from_str(inline).context("parsing --context")?,
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading context file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing context file {path}"))?
        }
        (None, None) => Value::Object(Default::default()),
    };

    if !context.is_object() {
        return Err(anyhow!("task context must be a JSON object"));
    }
    debug!(?context, "task context");
    Ok(context)
}

/// Directory relative paths in the config are resolved against.
///
/// - "configs/Stepgraph.toml" -> "configs"
/// - "Stepgraph.toml" (parent = "") -> the current working directory
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_summary(snapshot: &TaskSnapshot) {
    println!(
        "task {} ({}/{} v{})",
        snapshot.task_uuid, snapshot.namespace, snapshot.name, snapshot.version
    );
    println!(
        "  status: {}  ({}/{} steps complete, {:.0}%)",
        snapshot.status,
        snapshot.completed_steps,
        snapshot.total_steps,
        snapshot.completion_percentage
    );
    println!();
    for step in &snapshot.steps {
        println!(
            "  {:<24} {:<20} attempts {}/{}",
            step.name,
            step.current_state.as_str(),
            step.attempts,
            step.max_attempts
        );
        if let Some(err) = &step.error {
            println!("      error: {}", err.message);
        }
    }
}

/// Print templates, steps in execution order, and their dependencies.
fn print_dry_run(cfg: &ConfigFile) {
    println!("stepgraph dry-run");
    println!(
        "  engine.worker_concurrency = {}",
        cfg.engine.worker_concurrency
    );
    println!(
        "  engine.scheduler_partitions = {}",
        cfg.engine.scheduler_partitions
    );
    println!("  engine.storage = {:?}", cfg.engine.storage);
    println!();

    println!("templates ({}):", cfg.templates.len());
    for template in &cfg.templates {
        println!(
            "  - {}/{} v{}",
            template.namespace, template.name, template.version
        );
        if let Some(desc) = &template.description {
            println!("      {desc}");
        }
        if !template.required_context.is_empty() {
            println!("      required_context: {:?}", template.required_context);
        }

        // Config validation already built this graph once.
        let Ok(graph) = template.validate() else {
            continue;
        };
        for name in graph.steps() {
            let Some(step) = template.step(name) else {
                continue;
            };
            println!("      * {name}");
            match &step.command {
                Some(cmd) => println!("          cmd: {cmd}"),
                None => println!("          handler: {}", step.handler),
            }
            if !step.depends_on.is_empty() {
                println!("          depends_on: {:?}", step.depends_on);
            }
            println!("          max_attempts: {}", step.retry.max_attempts);
            if let Some(timeout) = step.timeout {
                println!("          timeout: {timeout:?}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
