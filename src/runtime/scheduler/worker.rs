//! Worker thread logic.
//!
//! Each worker owns a private [`TimerHeap`] and shares only its ready queue
//! with other threads. The loop is:
//!
//! 1. [`Worker::wait_for_ready_task`]: a due timer, else the queue
//! 2. acquire the global lock (write mode if the task asked for it)
//! 3. run the task
//! 4. reschedule on the returned [`Step`]

use super::intrusive_heap::TimerHeap;
use super::queue::TaskQueue;
use crate::runtime::clock::duration_to_ms;
use crate::runtime::task::{TaskContext, TaskCore, TaskHandle};
use crate::runtime::{Scheduler, Step, TaskId, TaskPanicResponse};
use crate::tracing_compat::{debug, error, trace, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identifier for a scheduler worker.
pub type WorkerId = usize;

/// The part of a worker visible to other threads.
#[derive(Debug)]
pub(crate) struct WorkerShared {
    pub(crate) id: WorkerId,
    pub(crate) queue: TaskQueue,
    pub(crate) stop: AtomicBool,
    timers: AtomicUsize,
}

impl WorkerShared {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            queue: TaskQueue::new(),
            stop: AtomicBool::new(false),
            timers: AtomicUsize::new(0),
        }
    }

    /// Number of tasks sleeping on this worker's timer heap.
    pub(crate) fn timer_len(&self) -> usize {
        self.timers.load(Ordering::Relaxed)
    }

    /// Asks the worker to exit and wakes it.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.queue.notify_all();
    }
}

/// A worker thread that executes tasks.
#[derive(Debug)]
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    heap: TimerHeap,
    scheduler: Scheduler,
}

impl Worker {
    pub(crate) fn new(shared: Arc<WorkerShared>, scheduler: Scheduler) -> Self {
        Self {
            shared,
            heap: TimerHeap::new(),
            scheduler,
        }
    }

    /// Runs the worker loop until a stop is requested.
    pub(crate) fn run_loop(mut self) {
        let worker_id = self.shared.id;
        debug!(worker_id, "worker started");
        while let Some(id) = self.wait_for_ready_task() {
            self.run_task(id);
        }

        // Sleepers move to the pool's pending list and run early on
        // whichever worker picks them up next.
        let sleepers = self.heap.drain();
        self.shared.timers.store(0, Ordering::Relaxed);
        if !sleepers.is_empty() {
            debug!(worker_id, count = sleepers.len(), "handing off sleeping tasks");
            self.scheduler.ctx.pool.park(sleepers);
        }
        debug!(worker_id, "worker stopped");
    }

    /// Next task to run: a due timer first, else the queue.
    ///
    /// Blocks on the queue for the time left until the earliest timer, or
    /// for the sleep floor when no timer is pending, and never for less than
    /// the floor. Returns `None` once a stop is requested.
    pub(crate) fn wait_for_ready_task(&mut self) -> Option<TaskId> {
        let min_sleep = self.scheduler.ctx.config.min_sleep;
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                return None;
            }

            let now = self.scheduler.now_ms();
            if let Some(id) = self.heap.pop_due(now) {
                self.shared.timers.store(self.heap.len(), Ordering::Relaxed);
                trace!(worker_id = self.shared.id, task_id = %id, "timer expired");
                return Some(id);
            }

            let timeout = self.heap.peek_deadline().map_or(min_sleep, |deadline| {
                Duration::from_millis(deadline.saturating_sub(now)).max(min_sleep)
            });
            if let Some(id) = self.shared.queue.pop_or_wait(timeout, &self.shared.stop) {
                return Some(id);
            }
        }
    }

    fn run_task(&mut self, id: TaskId) {
        let ctx = Arc::clone(&self.scheduler.ctx);
        let Some(core) = ctx.tasks.get(id) else {
            warn!(worker_id = self.shared.id, task_id = %id, "stale task id dequeued");
            return;
        };
        if core.is_dead() {
            return;
        }
        let handle = TaskHandle::new(&core, &ctx);

        loop {
            match self.run_once(&core, &handle) {
                Step::Finish => {
                    self.destroy(&core);
                    return;
                }
                Step::Idle => {
                    if core.try_go_idle() {
                        return;
                    }
                    trace!(task_id = %id, "events arrived during run, running again");
                }
                Step::WakeAfter(delay) => {
                    let delay = delay.max(ctx.config.min_sleep);
                    let wake_at = self.scheduler.now_ms().saturating_add(duration_to_ms(delay));
                    self.heap.push(id, wake_at);
                    self.shared.timers.store(self.heap.len(), Ordering::Relaxed);
                    core.mark_sleeping();
                    trace!(task_id = %id, wake_at, "task sleeping");
                    return;
                }
            }
        }
    }

    fn run_once(&self, core: &TaskCore, handle: &TaskHandle) -> Step {
        let mut body = core.body.lock();
        let Some(task) = body.as_mut() else {
            return Step::Finish;
        };

        let write = core.take_write_lock();
        let guard = self.scheduler.ctx.global_lock.acquire(write);
        core.clear_pin();
        let events = core.take_events();
        trace!(
            worker_id = self.shared.id,
            task_id = %core.id,
            ?events,
            write,
            "running task"
        );

        let mut cx = TaskContext::new(core, handle, &self.scheduler, events, self.shared.id, guard);
        let result = catch_unwind(AssertUnwindSafe(|| task.run(&mut cx)));
        drop(cx);

        match result {
            Ok(step) => step,
            Err(payload) => self.on_panic(core, payload.as_ref()),
        }
    }

    fn on_panic(&self, core: &TaskCore, payload: &(dyn Any + Send)) -> Step {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            worker_id = self.shared.id,
            task_id = %core.id,
            task = core.name(),
            panic = %message,
            "task panicked"
        );
        match self.scheduler.ctx.config.on_task_panic {
            TaskPanicResponse::Abort => std::process::abort(),
            TaskPanicResponse::Log => Step::Finish,
        }
    }

    fn destroy(&self, core: &Arc<TaskCore>) {
        core.mark_dead();
        self.scheduler.ctx.tasks.remove(core.id);
        let body = core.body.lock().take();
        drop(body);
        debug!(worker_id = self.shared.id, task_id = %core.id, task = core.name(), "task finished");
    }
}
