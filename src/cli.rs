// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::parse_duration;

/// Command-line arguments for `stepgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stepgraph",
    version,
    about = "Run workflow templates as dependency-ordered, retried step graphs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Stepgraph.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Stepgraph.toml")]
    pub config: String,

    /// Name of the template to run.
    #[arg(long, value_name = "NAME")]
    pub template: Option<String>,

    /// Namespace owning the template.
    #[arg(long, value_name = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Template version; the latest registered version when omitted.
    #[arg(long = "template-version", value_name = "SEMVER")]
    pub template_version: Option<String>,

    /// Task context as an inline JSON object.
    #[arg(long, value_name = "JSON", conflicts_with = "context_file")]
    pub context: Option<String>,

    /// Read the task context from a JSON file.
    #[arg(long, value_name = "PATH")]
    pub context_file: Option<String>,

    /// Who is creating the task.
    #[arg(long, default_value = "stepgraph-cli")]
    pub initiator: String,

    /// Free-form reason recorded on the task.
    #[arg(long, default_value = "manual run")]
    pub reason: String,

    /// Give up waiting for the task after this long (e.g. "60s", "5m").
    #[arg(long, value_parser = parse_duration_arg, default_value = "60s")]
    pub timeout: Duration,

    /// How long `blocked_by_failures` must persist before it is accepted as
    /// final by the polling loop.
    #[arg(long, value_parser = parse_duration_arg, default_value = "10s")]
    pub grace: Duration,

    /// Print the final task snapshot as JSON instead of a summary table.
    #[arg(long)]
    pub json: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STEPGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print templates, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
