// src/exec/mod.rs

//! Dispatch layer.
//!
//! Claimed steps are handed to a [`DispatchBackend`]; the production
//! [`WorkerPoolBackend`] runs them on a bounded pool of Tokio tasks and
//! reports every outcome back to the engine as a `StepResult` event.
//!
//! - [`backend`] provides the trait and the worker pool backend.
//! - [`executor_loop`] owns the worker loop and its concurrency limit.
//! - [`step_runner`] invokes one handler, with panic and timeout capture.
//! - [`command`] is the built-in shell command handler.

pub mod backend;
pub mod command;
pub mod executor_loop;
pub mod step_runner;

pub use backend::{DispatchBackend, WorkerPoolBackend};
pub use command::CommandHandler;
