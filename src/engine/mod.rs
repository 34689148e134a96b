// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the template catalog tasks are created from
//! - the synchronous orchestrator core that applies events to the store
//! - the scheduler loops that read the event log and dispatch ready steps
//! - retry policies and the delay between attempts
//!
//! The pure core lives in [`core`]; the async shell is implemented in
//! [`runtime`]; [`handle::Engine`] is the entry point for callers.

pub mod catalog;
pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod retry;
pub mod runtime;

pub use catalog::TemplateCatalog;
pub use core::Orchestrator;
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::{Engine, EngineOptions};
pub use retry::{Backoff, RetryPolicy};
pub use runtime::Runtime;
