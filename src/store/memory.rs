// src/store/memory.rs

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::TaskStore;
use crate::dag::state_manager::StateManager;
use crate::dag::task_info::{DispatchedStep, TaskRecord, TaskSnapshot};
use crate::dag::transition::{StepTransition, StepUpdate};
use crate::errors::{Result, StepgraphError};
use crate::fs::FileSystem;

type Slot = Arc<Mutex<TaskRecord>>;

/// Whether a mutation may be committed without reaching disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Durability {
    Required,
    BestEffort,
}

/// Writes committed tasks as `<state_dir>/tasks/<uuid>.json`.
struct FilePersistence {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl FilePersistence {
    fn path_for(&self, task_uuid: Uuid) -> PathBuf {
        self.dir.join(format!("{task_uuid}.json"))
    }

    fn save(&self, record: &TaskRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        self.fs
            .write(&self.path_for(record.task_uuid), &json)
            .map_err(|e| {
                StepgraphError::StoreError(format!(
                    "failed to persist task {}: {e:#}",
                    record.task_uuid
                ))
            })
    }
}

/// In-memory task store with optional file snapshots.
///
/// Every task sits behind its own mutex. A mutation clones the record,
/// applies the change to the clone, persists it (if enabled) and only then
/// swaps it in, so a failed write leaves the visible state untouched. Task
/// faults are the exception: see [`TaskStore::fail_task`].
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Slot>>,
    persistence: Option<FilePersistence>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            persistence: None,
        }
    }

    /// A store that snapshots every committed task under `state_dir` and
    /// starts out with whatever tasks are already there.
    pub fn with_persistence(fs: Arc<dyn FileSystem>, state_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = state_dir.as_ref().join("tasks");
        let mut tasks = HashMap::new();

        if fs.exists(&dir) {
            let entries = fs
                .read_dir(&dir)
                .map_err(|e| StepgraphError::StoreError(format!("{e:#}")))?;
            for path in entries {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = fs
                    .read_to_string(&path)
                    .map_err(|e| StepgraphError::StoreError(format!("{e:#}")))?;
                match serde_json::from_str::<TaskRecord>(&raw) {
                    Ok(record) => {
                        debug!(task = %record.task_uuid, status = %record.status, "loaded task");
                        tasks.insert(record.task_uuid, Arc::new(Mutex::new(record)));
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable task file");
                    }
                }
            }
            info!(count = tasks.len(), dir = %dir.display(), "restored tasks from disk");
        }

        Ok(Self {
            tasks: RwLock::new(tasks),
            persistence: Some(FilePersistence { fs, dir }),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, task_uuid: Uuid) -> Result<Slot> {
        let tasks = self
            .tasks
            .read()
            .map_err(|_| StepgraphError::StoreError("task index lock poisoned".into()))?;
        tasks
            .get(&task_uuid)
            .cloned()
            .ok_or(StepgraphError::TaskNotFound(task_uuid))
    }

    /// Run `f` against a draft of the task and commit the draft if `f`
    /// succeeds and changed anything.
    fn mutate<T>(
        &self,
        task_uuid: Uuid,
        f: impl FnOnce(&mut StateManager<'_>) -> Result<T>,
    ) -> Result<T> {
        self.mutate_with(task_uuid, Durability::Required, f)
    }

    fn mutate_with<T>(
        &self,
        task_uuid: Uuid,
        durability: Durability,
        f: impl FnOnce(&mut StateManager<'_>) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot(task_uuid)?;
        let mut current = slot
            .lock()
            .map_err(|_| StepgraphError::StoreError(format!("lock for task {task_uuid} poisoned")))?;

        let mut draft = current.clone();
        let out = f(&mut StateManager::new(&mut draft))?;

        if draft.revision != current.revision {
            if let Some(p) = &self.persistence {
                match p.save(&draft) {
                    Ok(()) => {}
                    Err(e) if durability == Durability::BestEffort => {
                        error!(task = %task_uuid, error = %e, "committing in memory only");
                    }
                    Err(e) => return Err(e),
                }
            }
            *current = draft;
        }
        Ok(out)
    }

    fn read<T>(&self, task_uuid: Uuid, f: impl FnOnce(&TaskRecord) -> T) -> Result<T> {
        let slot = self.slot(task_uuid)?;
        let record = slot
            .lock()
            .map_err(|_| StepgraphError::StoreError(format!("lock for task {task_uuid} poisoned")))?;
        Ok(f(&record))
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTaskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTaskStore")
            .field("tasks", &self.len())
            .field(
                "state_dir",
                &self.persistence.as_ref().map(|p| p.dir.display().to_string()),
            )
            .finish()
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert_task(&self, record: TaskRecord) -> Result<TaskSnapshot> {
        if let Some(p) = &self.persistence {
            p.save(&record)?;
        }
        let snapshot = record.snapshot();
        let mut tasks = self
            .tasks
            .write()
            .map_err(|_| StepgraphError::StoreError("task index lock poisoned".into()))?;
        if tasks.contains_key(&record.task_uuid) {
            return Err(StepgraphError::ConflictError(format!(
                "task {} already exists",
                record.task_uuid
            )));
        }
        debug!(task = %record.task_uuid, name = %record.name, namespace = %record.namespace, "task stored");
        tasks.insert(record.task_uuid, Arc::new(Mutex::new(record)));
        Ok(snapshot)
    }

    fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.read(task_uuid, TaskRecord::snapshot)
    }

    fn list_tasks(&self) -> Result<Vec<TaskSnapshot>> {
        let slots: Vec<Slot> = {
            let tasks = self
                .tasks
                .read()
                .map_err(|_| StepgraphError::StoreError("task index lock poisoned".into()))?;
            tasks.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let record = slot
                .lock()
                .map_err(|_| StepgraphError::StoreError("task lock poisoned".into()))?;
            out.push(record.snapshot());
        }
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    fn update_step(&self, task_uuid: Uuid, update: &StepUpdate) -> Result<StepTransition> {
        self.mutate(task_uuid, |mgr| mgr.apply(update))
    }

    fn claim_ready_steps(&self, task_uuid: Uuid) -> Result<Vec<DispatchedStep>> {
        self.mutate(task_uuid, |mgr| Ok(mgr.claim_ready_steps()))
    }

    fn cancel_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.mutate(task_uuid, |mgr| {
            if mgr.cancel() {
                info!(task = %task_uuid, "task cancelled");
            }
            Ok(())
        })?;
        self.get_task(task_uuid)
    }

    fn fail_task(&self, task_uuid: Uuid, reason: &str) -> Result<TaskSnapshot> {
        self.mutate_with(task_uuid, Durability::BestEffort, |mgr| {
            if mgr.fail(reason) {
                warn!(task = %task_uuid, reason, "task moved to error");
            }
            Ok(())
        })?;
        self.get_task(task_uuid)
    }

    fn recover_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot> {
        self.mutate(task_uuid, |mgr| {
            let requeued = mgr.recover();
            if !requeued.is_empty() {
                info!(task = %task_uuid, ?requeued, "requeued interrupted steps");
            }
            Ok(())
        })?;
        self.get_task(task_uuid)
    }
}
