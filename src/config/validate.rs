// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use semver::Version;

use crate::config::model::{
    ConfigFile, EngineSection, EngineSettings, RawConfigFile, RawStep, RawTemplate, RetrySection,
};
use crate::dag::template::{is_valid_name, StepDefinition, TaskTemplate};
use crate::engine::retry::{Backoff, RetryPolicy};
use crate::errors::{Result, StepgraphError};
use crate::types::{parse_duration, BackoffKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StepgraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_templates(&raw)?;
        let engine = validate_engine(&raw.engine)?;

        let mut seen: HashSet<(String, String, Version)> = HashSet::new();
        let mut templates = Vec::with_capacity(raw.template.len());
        for t in &raw.template {
            let template = build_template(t, &engine, &raw.engine.retry)?;
            let version = parse_version(t)?;
            if !seen.insert((template.namespace.clone(), template.name.clone(), version)) {
                return Err(StepgraphError::ConfigError(format!(
                    "template '{}' version {} is defined twice in namespace '{}'",
                    template.name, template.version, template.namespace
                )));
            }
            templates.push(template);
        }

        Ok(ConfigFile::new_unchecked(engine, templates))
    }
}

fn ensure_has_templates(cfg: &RawConfigFile) -> Result<()> {
    if cfg.template.is_empty() {
        return Err(StepgraphError::ConfigError(
            "config must contain at least one [[template]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine(engine: &EngineSection) -> Result<EngineSettings> {
    for (field, value) in [
        ("worker_concurrency", engine.worker_concurrency),
        ("event_buffer", engine.event_buffer),
        ("scheduler_partitions", engine.scheduler_partitions),
    ] {
        if value == 0 {
            return Err(StepgraphError::ConfigError(format!(
                "[engine].{field} must be >= 1 (got 0)"
            )));
        }
    }

    let step_timeout = engine
        .step_timeout
        .as_deref()
        .map(|s| duration("[engine].step_timeout", s))
        .transpose()?;

    Ok(EngineSettings {
        worker_concurrency: engine.worker_concurrency,
        event_buffer: engine.event_buffer,
        scheduler_partitions: engine.scheduler_partitions,
        storage: engine.storage,
        state_dir: engine.state_dir.clone(),
        step_timeout,
        retry: retry_policy("[engine.retry]", &engine.retry, None)?,
    })
}

/// Build a policy from the global section, with optional per-step overrides.
fn retry_policy(
    location: &str,
    global: &RetrySection,
    step: Option<&RawStep>,
) -> Result<RetryPolicy> {
    let max_attempts = step.and_then(|s| s.max_attempts).unwrap_or(global.max_attempts);
    if max_attempts == 0 {
        return Err(StepgraphError::ConfigError(format!(
            "{location}: max_attempts must be >= 1 (got 0)"
        )));
    }

    let kind = step.and_then(|s| s.backoff).unwrap_or(global.backoff);
    let delay = step
        .and_then(|s| s.delay.as_deref())
        .unwrap_or(&global.delay);
    let delay = duration(&format!("{location}: delay"), delay)?;

    let backoff = match kind {
        BackoffKind::Fixed => Backoff::Fixed { delay },
        BackoffKind::Exponential => {
            let factor = step.and_then(|s| s.factor).unwrap_or(global.factor);
            if factor == 0 {
                return Err(StepgraphError::ConfigError(format!(
                    "{location}: factor must be >= 1 (got 0)"
                )));
            }
            let max = step
                .and_then(|s| s.max_delay.as_deref())
                .unwrap_or(&global.max_delay);
            let max = duration(&format!("{location}: max_delay"), max)?;
            if max < delay {
                return Err(StepgraphError::ConfigError(format!(
                    "{location}: max_delay ({max:?}) is shorter than delay ({delay:?})"
                )));
            }
            Backoff::Exponential {
                base: delay,
                factor,
                max,
            }
        }
    };

    Ok(RetryPolicy::new(max_attempts, backoff))
}

fn build_template(
    raw: &RawTemplate,
    engine: &EngineSettings,
    global_retry: &RetrySection,
) -> Result<TaskTemplate> {
    for (what, value) in [("name", &raw.name), ("namespace", &raw.namespace)] {
        if !is_valid_name(value) {
            return Err(StepgraphError::ConfigError(format!(
                "template {what} '{value}' is invalid (use letters, digits, '_', '-', '.')"
            )));
        }
    }

    let mut steps = Vec::with_capacity(raw.step.len());
    for s in &raw.step {
        let location = format!("template '{}' step '{}'", raw.name, s.name);

        let handler = match (&s.cmd, &s.handler) {
            (Some(_), Some(_)) => {
                return Err(StepgraphError::ConfigError(format!(
                    "{location}: `cmd` and `handler` are mutually exclusive"
                )));
            }
            (_, Some(h)) if !is_valid_name(h) => {
                return Err(StepgraphError::ConfigError(format!(
                    "{location}: invalid handler name '{h}'"
                )));
            }
            (_, Some(h)) => h.clone(),
            // Command handler keys are unique per template version.
            (Some(_), None) => format!("{}.{}.{}", raw.name, raw.version, s.name),
            (None, None) => s.name.clone(),
        };

        if let Some(cmd) = &s.cmd
            && cmd.trim().is_empty()
        {
            return Err(StepgraphError::ConfigError(format!(
                "{location}: `cmd` must not be empty"
            )));
        }

        let timeout = match &s.timeout {
            Some(t) => Some(duration(&format!("{location}: timeout"), t)?),
            None => engine.step_timeout,
        };

        steps.push(StepDefinition {
            name: s.name.clone(),
            handler,
            depends_on: s.depends_on.clone(),
            retry: retry_policy(&location, global_retry, Some(s))?,
            command: s.cmd.clone(),
            timeout,
        });
    }

    let template = TaskTemplate {
        name: raw.name.clone(),
        namespace: raw.namespace.clone(),
        version: raw.version.clone(),
        description: raw.description.clone(),
        required_context: raw.required_context.clone(),
        steps,
    };

    // Graph checks (names, unknown deps, cycles) surface as TemplateError.
    template.validate()?;
    Ok(template)
}

fn parse_version(t: &RawTemplate) -> Result<Version> {
    Version::parse(&t.version).map_err(|e| {
        StepgraphError::ConfigError(format!(
            "template '{}' has invalid version '{}': {e}",
            t.name, t.version
        ))
    })
}

fn duration(location: &str, raw: &str) -> Result<Duration> {
    parse_duration(raw).map_err(|e| StepgraphError::ConfigError(format!("{location}: {e}")))
}
