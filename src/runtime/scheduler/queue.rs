//! Blocking per-worker ready queue.
//!
//! The only state a worker shares with other threads: an [`IntrusiveRing`]
//! behind a mutex, plus a condvar the owning worker parks on.

use super::intrusive::IntrusiveRing;
use crate::runtime::TaskId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// FIFO of ready task ids with a blocking pop.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    ring: Mutex<IntrusiveRing>,
    available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a task and wakes the owning worker.
    ///
    /// Returns `false` if the task was already queued.
    pub(crate) fn push(&self, id: TaskId) -> bool {
        let pushed = self.ring.lock().push_back(id);
        if pushed {
            self.available.notify_one();
        }
        pushed
    }

    pub(crate) fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Pops the next task, blocking up to `timeout`.
    ///
    /// `stop` is checked under the queue lock, so a stop request followed by
    /// [`notify_all`](Self::notify_all) is never missed.
    pub(crate) fn pop_or_wait(&self, timeout: Duration, stop: &AtomicBool) -> Option<TaskId> {
        let mut ring = self.ring.lock();
        if let Some(id) = ring.pop_front() {
            return Some(id);
        }
        if stop.load(Ordering::Acquire) {
            return None;
        }
        let _ = self.available.wait_for(&mut ring, timeout);
        ring.pop_front()
    }

    /// Wakes the worker regardless of queue contents.
    pub(crate) fn notify_all(&self) {
        let _ring = self.ring.lock();
        self.available.notify_all();
    }

    pub(crate) fn drain(&self) -> Vec<TaskId> {
        self.ring.lock().drain()
    }
}
