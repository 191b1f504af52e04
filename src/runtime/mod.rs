//! Scheduler context, tasks, workers, and readiness delivery.
//!
//! This module contains the core runtime machinery:
//!
//! - [`config`]: scheduler configuration types
//! - [`builder`]: the move-based [`SchedulerBuilder`]
//! - [`env_config`]: environment and config-file overrides
//! - [`task`]: [`Task`], [`Step`], [`TaskHandle`], [`TaskContext`]
//! - [`event_flags`]: the task event bitmask
//! - [`scheduler`]: worker threads, ready queues, timer heaps
//! - [`global_lock`]: the read/write lock held around every run
//! - [`reactor`]: the readiness multiplexer
//! - [`event`]: event contexts and the event thread
//!
//! # Ownership
//!
//! Everything a scheduler needs lives in one [`SchedulerContext`] shared by
//! `Arc`; there are no process-wide statics, so independent schedulers can
//! coexist in one process (tests do this freely). Worker threads hold a
//! [`Scheduler`] clone each, so a scheduler with running workers stays alive
//! until [`Scheduler::shutdown`] is called.
//!
//! # Quick Start
//!
//! ```ignore
//! use streamsched::{EventFlags, Scheduler, Step, TaskContext};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::builder().worker_threads(2).build()?;
//! let ticker = scheduler.spawn("ticker", |cx: &mut TaskContext<'_>| {
//!     if cx.events().contains(EventFlags::KILL) {
//!         return Step::Finish;
//!     }
//!     Step::WakeAfter(Duration::from_millis(100))
//! })?;
//! ticker.signal(EventFlags::START);
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod env_config;
pub mod event;
pub mod event_flags;
pub mod global_lock;
pub mod reactor;
pub mod scheduler;
pub mod task;
pub mod task_table;

pub use builder::SchedulerBuilder;
pub use config::{SchedulerConfig, TaskPanicResponse};
pub use event_flags::EventFlags;
pub use global_lock::{GlobalGuard, GlobalLock};
pub use task::{Step, Task, TaskContext, TaskHandle};
pub use task_table::TaskId;

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, info};
use clock::Clock;
use event::thread::EventThread;
use event::EventDispatcher;
use parking_lot::Mutex;
use reactor::{Multiplexer, Wait};
use scheduler::pool::WorkerPool;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task::TaskCore;
use task_table::TaskTable;

/// Shared state of one scheduler.
#[derive(Debug)]
pub struct SchedulerContext {
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Clock,
    pub(crate) tasks: TaskTable,
    pub(crate) pool: WorkerPool,
    pub(crate) global_lock: GlobalLock,
    pub(crate) events: Arc<EventDispatcher>,
    event_thread: Mutex<Option<EventThread>>,
    shut_down: AtomicBool,
}

/// Handle to a scheduler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub(crate) ctx: Arc<SchedulerContext>,
}

impl Scheduler {
    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Creates a scheduler with no workers and no event thread.
    pub(crate) fn with_multiplexer(config: SchedulerConfig, mux: Box<dyn Multiplexer>) -> Self {
        let ctx = SchedulerContext {
            clock: Clock::new(),
            tasks: TaskTable::new(),
            pool: WorkerPool::new(),
            global_lock: GlobalLock::new(config.global_lock_max_wait),
            events: Arc::new(EventDispatcher::new(mux)),
            event_thread: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            config,
        };
        Self { ctx: Arc::new(ctx) }
    }

    pub(crate) const fn from_context(ctx: Arc<SchedulerContext>) -> Self {
        Self { ctx }
    }

    /// Registers a task. It does not run until first signaled.
    pub fn spawn(&self, name: impl Into<String>, task: impl Task) -> Result<TaskHandle> {
        if self.is_shut_down() {
            return Err(Error::new(ErrorKind::ShutDown).with_message("spawn after shutdown"));
        }
        let name = name.into();
        let core = self
            .ctx
            .tasks
            .insert_with(|id| TaskCore::new(id, name, Box::new(task)));
        debug!(task_id = %core.id, task = core.name(), "task spawned");
        Ok(TaskHandle::new(&core, &self.ctx))
    }

    /// Starts `count` more worker threads.
    pub fn add_workers(&self, count: usize) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::new(ErrorKind::ShutDown));
        }
        self.ctx.pool.add_workers(self, count)
    }

    /// Stops and joins every worker. Ready and sleeping tasks are kept and
    /// run once workers are added again.
    pub fn remove_workers(&self) {
        self.ctx.pool.remove_workers();
    }

    /// Number of running workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.ctx.pool.worker_count()
    }

    /// Ready tasks queued on `worker`, or `None` for an unknown worker.
    #[must_use]
    pub fn queue_len(&self, worker: usize) -> Option<usize> {
        self.ctx.pool.queue_len(worker)
    }

    /// Tasks sleeping on `worker`'s timer heap.
    #[must_use]
    pub fn timer_len(&self, worker: usize) -> Option<usize> {
        self.ctx.pool.timer_len(worker)
    }

    /// Ready tasks waiting for a worker to exist.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.ctx.pool.pending_len()
    }

    /// Number of live tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.ctx.tasks.len()
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    /// The readiness dispatcher shared by every event context.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.ctx.events
    }

    /// The scheduler-wide read/write lock.
    #[must_use]
    pub fn global_lock(&self) -> &GlobalLock {
        &self.ctx.global_lock
    }

    /// Milliseconds since the scheduler was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.ctx.clock.now_ms()
    }

    /// Waits for one multiplexer result and dispatches it.
    ///
    /// For schedulers built without an event thread.
    pub fn poll_events(&self, timeout: Option<Duration>) -> io::Result<Wait> {
        self.ctx.events.poll(self, timeout)
    }

    /// Starts the event thread.
    pub fn start_event_thread(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::new(ErrorKind::ShutDown));
        }
        let mut slot = self.ctx.event_thread.lock();
        if slot.is_some() {
            return Err(Error::new(ErrorKind::AlreadyStarted).with_message("event thread"));
        }
        *slot = Some(EventThread::start(&self.ctx)?);
        Ok(())
    }

    /// Stops the event thread if it is running.
    pub fn stop_event_thread(&self) {
        let thread = self.ctx.event_thread.lock().take();
        if let Some(thread) = thread {
            thread.stop();
        }
    }

    /// Returns true if the event thread is running.
    #[must_use]
    pub fn has_event_thread(&self) -> bool {
        self.ctx.event_thread.lock().is_some()
    }

    /// Stops the event thread and every worker, then destroys all tasks.
    ///
    /// Idempotent. Task bodies are dropped on the calling thread.
    pub fn shutdown(&self) {
        if self.ctx.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_event_thread();
        self.remove_workers();
        let tasks = self.ctx.tasks.drain();
        for core in &tasks {
            core.mark_dead();
        }
        let count = tasks.len();
        for core in tasks {
            // A body still locked belongs to the task calling shutdown from
            // its own run; it is dropped with the last reference to its core.
            let body = core.body.try_lock().and_then(|mut body| body.take());
            drop(body);
        }
        info!(tasks = count, "scheduler shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.ctx.shut_down.load(Ordering::Acquire)
    }
}
