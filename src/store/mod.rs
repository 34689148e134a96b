// src/store/mod.rs

//! Task/step graph store.
//!
//! The store owns every [`TaskRecord`] and is the only place transitions are
//! committed. Each mutating method is atomic per task: readers either see the
//! state before the call or after it, never in between.

pub mod memory;

use std::fmt::Debug;

use uuid::Uuid;

use crate::dag::task_info::{DispatchedStep, TaskRecord, TaskSnapshot};
use crate::dag::transition::{StepTransition, StepUpdate};
use crate::errors::Result;

pub use memory::MemoryTaskStore;

pub trait TaskStore: Send + Sync + Debug {
    /// Persist a freshly instantiated task.
    fn insert_task(&self, record: TaskRecord) -> Result<TaskSnapshot>;

    /// Current snapshot of a task. `TaskNotFound` if unknown.
    fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot>;

    /// Snapshots of every known task, oldest first.
    fn list_tasks(&self) -> Result<Vec<TaskSnapshot>>;

    /// Apply one step transition. `ConflictError` if it is illegal or stale.
    fn update_step(&self, task_uuid: Uuid, update: &StepUpdate) -> Result<StepTransition>;

    /// Move every ready step to `dispatched` and return dispatch payloads.
    fn claim_ready_steps(&self, task_uuid: Uuid) -> Result<Vec<DispatchedStep>>;

    /// Mark the task cancelled. A no-op on terminal tasks.
    fn cancel_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot>;

    /// Record an engine fault and move the task to `error`. A no-op on
    /// terminal tasks.
    ///
    /// The fault is committed even if it cannot be persisted, since it is
    /// usually the persistence failure being recorded.
    fn fail_task(&self, task_uuid: Uuid, reason: &str) -> Result<TaskSnapshot>;

    /// Requeue steps left `dispatched` or `retrying` by a previous engine
    /// run. An interrupted attempt counts against the step's retry budget.
    fn recover_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot>;
}
