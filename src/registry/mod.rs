// src/registry/mod.rs

//! Handler registry: maps (namespace, handler name) to an executable
//! capability.
//!
//! The registry is assembled once through [`HandlerRegistryBuilder`] and then
//! frozen behind an `Arc`; the dispatcher only ever reads it.

pub mod handler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::dag::template::TaskTemplate;
use crate::exec::command::CommandHandler;

pub use handler::{FnHandler, HandlerFuture, HandlerOutcome, StepFailure, StepHandler, StepInputs};

/// Lookup key for a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey {
    pub namespace: String,
    pub name: String,
}

impl HandlerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Immutable handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(&HandlerKey::new(namespace, name))
            .cloned()
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.handlers.contains_key(&HandlerKey::new(namespace, name))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<HandlerKey> {
        let mut keys: Vec<HandlerKey> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.keys())
            .finish()
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<HandlerKey, Arc<dyn StepHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` under (namespace, name). A later registration for
    /// the same key replaces the earlier one.
    pub fn register(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        let key = HandlerKey::new(namespace, name);
        debug!(handler = %key, "registering step handler");
        self.handlers.insert(key, handler);
        self
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(
        self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&StepInputs) -> Result<Value, StepFailure> + Send + Sync + 'static,
    {
        let name = name.into();
        let handler = Arc::new(FnHandler::new(name.clone(), func));
        self.register(namespace, name, handler)
    }

    /// Register a [`CommandHandler`] for every step that declares a shell
    /// command.
    pub fn with_command_steps<'a>(
        mut self,
        templates: impl IntoIterator<Item = &'a TaskTemplate>,
    ) -> Self {
        for template in templates {
            for step in &template.steps {
                if let Some(cmd) = &step.command {
                    let handler = Arc::new(CommandHandler::new(step.handler.clone(), cmd.clone()));
                    self = self.register(template.namespace.clone(), step.handler.clone(), handler);
                }
            }
        }
        self
    }

    pub fn build(self) -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}
