//! The set of worker threads and task routing between them.
//!
//! Ready tasks are routed to exactly one worker: the task's pinned worker if
//! it asked for one, otherwise round robin. There is no stealing; a task
//! stays on the worker it was handed to until it next goes idle.
//!
//! Tasks that become ready while no worker exists wait in a pending list
//! and are handed out by the next [`WorkerPool::add_workers`].

use super::worker::{Worker, WorkerShared};
use crate::error::{Error, Result};
use crate::runtime::{Scheduler, TaskId};
use crate::tracing_compat::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Worker threads plus the routing state shared by every producer.
#[derive(Debug, Default)]
pub(crate) struct WorkerPool {
    workers: RwLock<Vec<Arc<WorkerShared>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    pending: Mutex<Vec<TaskId>>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Routes a ready task to a worker queue.
    pub(crate) fn enqueue(&self, id: TaskId, pinned: Option<usize>) {
        let workers = self.workers.read();
        if workers.is_empty() {
            self.pending.lock().push(id);
            return;
        }
        let index = match pinned {
            Some(worker) if worker < workers.len() => worker,
            _ => self.next.fetch_add(1, Ordering::Relaxed) % workers.len(),
        };
        if !workers[index].queue.push(id) {
            warn!(task_id = %id, worker_id = index, "task already queued");
        }
    }

    /// Holds tasks until a worker can take them.
    pub(crate) fn park(&self, ids: Vec<TaskId>) {
        if ids.is_empty() {
            return;
        }
        self.pending.lock().extend(ids);
        self.flush_pending();
    }

    /// Starts `count` more workers.
    ///
    /// Workers are numbered in start order, continuing from the current
    /// count. On a spawn failure the workers already started keep running.
    pub(crate) fn add_workers(&self, scheduler: &Scheduler, count: usize) -> Result<()> {
        let config = &scheduler.ctx.config;
        let result = {
            let mut threads = self.threads.lock();
            let mut workers = self.workers.write();
            let mut result = Ok(());
            for _ in 0..count {
                let id = workers.len();
                let shared = Arc::new(WorkerShared::new(id));
                let worker = Worker::new(Arc::clone(&shared), scheduler.clone());
                let name = format!("{}-{}", config.thread_name_prefix, id);
                let mut builder = thread::Builder::new().name(name.clone());
                if config.thread_stack_size > 0 {
                    builder = builder.stack_size(config.thread_stack_size);
                }
                match builder.spawn(move || worker.run_loop()) {
                    Ok(handle) => {
                        threads.push(handle);
                        workers.push(shared);
                    }
                    Err(err) => {
                        error!(thread = %name, error = %err, "failed to spawn worker");
                        result = Err(Error::thread_spawn(&name, err));
                        break;
                    }
                }
            }
            debug!(workers = workers.len(), "worker pool resized");
            result
        };
        self.flush_pending();
        result
    }

    /// Stops and joins every worker.
    ///
    /// Tasks still queued, and tasks sleeping on a worker's timer heap, move
    /// to the pending list. Safe to call from a task: the calling worker is
    /// detached instead of joined and exits once its run returns.
    pub(crate) fn remove_workers(&self) {
        let removed = std::mem::take(&mut *self.workers.write());
        let handles = std::mem::take(&mut *self.threads.lock());
        for worker in &removed {
            worker.request_stop();
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }

        let mut pending = self.pending.lock();
        for worker in &removed {
            pending.extend(worker.queue.drain());
        }
        debug!(removed = removed.len(), pending = pending.len(), "workers removed");
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    pub(crate) fn queue_len(&self, worker: usize) -> Option<usize> {
        self.workers.read().get(worker).map(|w| w.queue.len())
    }

    pub(crate) fn timer_len(&self, worker: usize) -> Option<usize> {
        self.workers.read().get(worker).map(|w| w.timer_len())
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn flush_pending(&self) {
        if self.workers.read().is_empty() {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.lock());
        for id in pending {
            self.enqueue(id, None);
        }
    }
}
