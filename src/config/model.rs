// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::template::TaskTemplate;
use crate::engine::handle::EngineOptions;
use crate::engine::retry::RetryPolicy;
use crate::types::{BackoffKind, StorageMode};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// worker_concurrency = 8
///
/// [engine.retry]
/// max_attempts = 3
/// backoff = "exponential"
///
/// [[template]]
/// name = "order_processing"
/// namespace = "ecommerce"
/// version = "1.0.0"
/// required_context = ["cart_items"]
///
/// [[template.step]]
/// name = "validate_cart"
/// cmd = "./bin/validate_cart"
/// ```
///
/// Every section is optional apart from at least one template.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    /// All `[[template]]` entries.
    #[serde(default)]
    pub template: Vec<RawTemplate>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Capacity of the queue between scheduler loops and workers.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default = "default_scheduler_partitions")]
    pub scheduler_partitions: usize,

    #[serde(default)]
    pub storage: StorageMode,

    /// Where task snapshots go when `storage = "file"`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Default upper bound for one handler invocation, e.g. `"30s"`.
    #[serde(default)]
    pub step_timeout: Option<String>,

    #[serde(default)]
    pub retry: RetrySection,
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_event_buffer() -> usize {
    64
}

fn default_scheduler_partitions() -> usize {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".stepgraph")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            event_buffer: default_event_buffer(),
            scheduler_partitions: default_scheduler_partitions(),
            storage: StorageMode::default(),
            state_dir: default_state_dir(),
            step_timeout: None,
            retry: RetrySection::default(),
        }
    }
}

/// `[engine.retry]` section: the default policy for every step.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Fixed delay, or the base delay of the exponential curve.
    #[serde(default = "default_delay")]
    pub delay: String,

    /// Cap for the exponential curve.
    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_factor")]
    pub factor: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay() -> String {
    "1s".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn default_factor() -> u32 {
    2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::default(),
            delay: default_delay(),
            max_delay: default_max_delay(),
            factor: default_factor(),
        }
    }
}

/// `[[template]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTemplate {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Context keys every task of this template must provide.
    #[serde(default)]
    pub required_context: Vec<String>,

    /// `[[template.step]]` entries.
    #[serde(default)]
    pub step: Vec<RawStep>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// `[[template.step]]` entry.
///
/// Exactly one of `cmd` and `handler` may be set; with neither, the handler
/// name defaults to the step name and must be registered in code.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    pub name: String,

    /// Shell command run by the built-in command handler.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Name of a handler registered in code.
    #[serde(default)]
    pub handler: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    // Per-step overrides of `[engine.retry]`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<BackoffKind>,
    #[serde(default)]
    pub delay: Option<String>,
    #[serde(default)]
    pub max_delay: Option<String>,
    #[serde(default)]
    pub factor: Option<u32>,

    /// Overrides `[engine].step_timeout`.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub worker_concurrency: usize,
    pub event_buffer: usize,
    pub scheduler_partitions: usize,
    pub storage: StorageMode,
    pub state_dir: PathBuf,
    pub step_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            worker_concurrency: self.worker_concurrency,
            event_buffer: self.event_buffer,
            scheduler_partitions: self.scheduler_partitions,
        }
    }
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so every template in
/// here has a valid, acyclic step graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub templates: Vec<TaskTemplate>,
}

impl ConfigFile {
    /// Constructor used by the validator.
    pub(crate) fn new_unchecked(engine: EngineSettings, templates: Vec<TaskTemplate>) -> Self {
        Self { engine, templates }
    }
}
