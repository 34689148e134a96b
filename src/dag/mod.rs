// src/dag/mod.rs

//! Step graphs and per-task state.
//!
//! - [`template`] holds the static definition a task is created from.
//! - [`graph`] is the validated step DAG with a topological order.
//! - [`task_info`] holds task and step records and their public snapshots.
//! - [`resolver`] decides which steps are ready to dispatch.
//! - [`state_machine`] defines legal transitions and status aggregation.
//! - [`state_manager`] applies transitions to a single task record.
//! - [`transition`] defines update requests and their results.

pub mod graph;
pub mod resolver;
pub mod state_machine;
pub mod state_manager;
pub mod task_info;
pub mod template;
pub mod transition;

pub use graph::DagGraph;
pub use resolver::Resolver;
pub use state_manager::StateManager;
pub use task_info::{
    DispatchedStep, StepError, StepRecord, StepSnapshot, TaskCreated, TaskFault, TaskRecord,
    TaskRequest, TaskSnapshot,
};
pub use template::{StepDefinition, TaskTemplate};
pub use transition::{ScheduledRetry, StepChange, StepTransition, StepUpdate};
