// src/exec/command.rs

//! Built-in handler that runs a step as a shell command.
//!
//! Protocol between the engine and the process:
//! - stdin: the step inputs as one JSON document
//! - env: `STEPGRAPH_TASK_UUID`, `STEPGRAPH_STEP`, `STEPGRAPH_ATTEMPT`,
//!   `STEPGRAPH_NAMESPACE`
//! - stdout: the step result (JSON; anything else is kept as a string)
//! - exit code: `0` success, `65` validation failure, `75` retryable
//!   failure, anything else permanent failure

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::registry::{HandlerFuture, HandlerOutcome, StepFailure, StepHandler, StepInputs};

/// Exit code for malformed input (`EX_DATAERR`).
pub const EXIT_VALIDATION: i32 = 65;
/// Exit code for a transient failure (`EX_TEMPFAIL`).
pub const EXIT_RETRYABLE: i32 = 75;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandHandler {
    name: String,
    cmd: String,
}

impl CommandHandler {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
        }
    }

    async fn run(&self, inputs: &StepInputs) -> Result<HandlerOutcome> {
        info!(
            task = %inputs.task_uuid,
            step = %inputs.step_name,
            attempt = inputs.attempt,
            cmd = %self.cmd,
            "starting step process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.env("STEPGRAPH_TASK_UUID", inputs.task_uuid.to_string())
            .env("STEPGRAPH_STEP", &inputs.step_name)
            .env("STEPGRAPH_ATTEMPT", inputs.attempt.to_string())
            .env("STEPGRAPH_NAMESPACE", &inputs.namespace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for step '{}'", inputs.step_name))?;

        let payload = serde_json::to_vec(inputs).context("serializing step inputs")?;
        if let Some(mut stdin) = child.stdin.take() {
            let step = inputs.step_name.clone();
            tokio::spawn(async move {
                // Commands that ignore stdin close the pipe early.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(step = %step, error = %e, "step process did not read stdin");
                }
            });
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for process of step '{}'", inputs.step_name))?;

        let code = output.status.code();
        info!(
            task = %inputs.task_uuid,
            step = %inputs.step_name,
            exit_code = code.unwrap_or(-1),
            success = output.status.success(),
            "step process exited"
        );

        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(match code {
            Some(0) => HandlerOutcome::success(parse_stdout(&output.stdout)),
            Some(code) => HandlerOutcome::Failure(classify_exit(code, &stderr)),
            None => HandlerOutcome::Failure(
                StepFailure::handler(failure_message("terminated by signal", &stderr))
                    .with_code("signal"),
            ),
        })
    }
}

impl StepHandler for CommandHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn call<'a>(&'a self, inputs: &'a StepInputs) -> HandlerFuture<'a> {
        Box::pin(async move {
            match self.run(inputs).await {
                Ok(outcome) => outcome,
                Err(err) => HandlerOutcome::Failure(
                    StepFailure::handler(format!("{err:#}")).with_code("spawn_error"),
                ),
            }
        })
    }
}

/// Map a non-zero exit code to a failure.
pub fn classify_exit(code: i32, stderr: &str) -> StepFailure {
    let message = failure_message(&format!("exited with code {code}"), stderr);
    let failure = match code {
        EXIT_VALIDATION => StepFailure::validation(message),
        EXIT_RETRYABLE => StepFailure::retryable(message),
        _ => StepFailure::permanent(message),
    };
    failure.with_code(format!("exit_{code}"))
}

fn failure_message(what: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    if tail.is_empty() {
        format!("process {what}")
    } else {
        format!("process {what}: {}", tail.join("\n"))
    }
}

/// Stdout as JSON if it parses, otherwise as a trimmed string. Empty stdout
/// is `null`.
fn parse_stdout(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
