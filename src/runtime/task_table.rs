//! Task identifiers and the table that owns every live task.
//!
//! The table is the only strong owner of a task's core once the task is
//! spawned. Queues and timer heaps carry [`TaskId`]s; producers carry
//! [`TaskHandle`](super::TaskHandle)s holding a weak reference. When a task
//! finishes, the worker removes it here and the id goes stale: its arena
//! slot may be reused, but with a new generation.

use super::task::TaskCore;
use crate::util::{Arena, ArenaIndex};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

/// Generation-checked identifier of a task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(ArenaIndex);

impl TaskId {
    /// Wraps an arena index.
    #[must_use]
    pub const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Builds an id from raw parts (tests and diagnostics).
    #[must_use]
    pub const fn new_for_test(slot: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(slot, generation))
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Returns the slot number, used to index per-task link tables.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0.index() as usize
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}.{}", self.0.index(), self.0.generation())
    }
}

/// Owner of every live task.
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    tasks: Mutex<Arena<Arc<TaskCore>>>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a task built from its assigned id.
    pub(crate) fn insert_with(&self, build: impl FnOnce(TaskId) -> TaskCore) -> Arc<TaskCore> {
        let mut tasks = self.tasks.lock();
        let mut created = None;
        tasks.insert_with(|idx| {
            let core = Arc::new(build(TaskId::from_arena(idx)));
            created = Some(Arc::clone(&core));
            core
        });
        created.unwrap_or_else(|| unreachable!("insert_with always calls its builder"))
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Arc<TaskCore>> {
        self.tasks.lock().get(id.arena_index()).cloned()
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<Arc<TaskCore>> {
        self.tasks.lock().remove(id.arena_index())
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Removes every task, returning them so the caller can drop them
    /// outside the table lock.
    pub(crate) fn drain(&self) -> Vec<Arc<TaskCore>> {
        let mut tasks = self.tasks.lock();
        let ids: Vec<ArenaIndex> = tasks.iter().map(|(idx, _)| idx).collect();
        ids.into_iter().filter_map(|idx| tasks.remove(idx)).collect()
    }
}
