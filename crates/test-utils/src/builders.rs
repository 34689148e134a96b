#![allow(dead_code)]

use std::time::Duration;

use stepgraph::dag::{StepDefinition, TaskTemplate};
use stepgraph::engine::{Backoff, RetryPolicy};

/// Retry policy used by default in tests: 3 attempts, 5ms apart.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Backoff::Fixed {
            delay: Duration::from_millis(5),
        },
    )
}

/// Builder for `TaskTemplate` to simplify test setup.
pub struct TemplateBuilder {
    template: TaskTemplate,
}

impl TemplateBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            template: TaskTemplate {
                name: name.to_string(),
                namespace: "default".to_string(),
                version: "1.0.0".to_string(),
                description: None,
                required_context: vec![],
                steps: vec![],
            },
        }
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.template.namespace = ns.to_string();
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.template.version = version.to_string();
        self
    }

    pub fn requires(mut self, key: &str) -> Self {
        self.template.required_context.push(key.to_string());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.template.steps.push(step);
        self
    }

    /// Shorthand for a step with default settings and the given dependencies.
    pub fn step(self, name: &str, deps: &[&str]) -> Self {
        let mut builder = StepBuilder::new(name);
        for dep in deps {
            builder = builder.after(dep);
        }
        self.with_step(builder.build())
    }

    /// Unvalidated template; the engine checks it.
    pub fn build(self) -> TaskTemplate {
        self.template
    }
}

/// Builder for `StepDefinition`.
pub struct StepBuilder {
    step: StepDefinition,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        let mut step = StepDefinition::new(name);
        step.retry = fast_retry(3);
        Self { step }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.depends_on.push(dep.to_string());
        self
    }

    pub fn handler(mut self, handler: &str) -> Self {
        self.step.handler = handler.to_string();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.step.retry = RetryPolicy::new(n, self.step.retry.backoff);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.step.retry.backoff = backoff;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.step.timeout = Some(timeout);
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.step.command = Some(cmd.to_string());
        self
    }

    pub fn build(self) -> StepDefinition {
        self.step
    }
}
