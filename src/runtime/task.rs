//! Tasks, their atomic event mailbox, and the handles producers signal.
//!
//! A [`Task`] is a unit of cooperative work. It never blocks: each call to
//! [`Task::run`] consumes the events delivered since the last call and returns
//! a [`Step`] telling the worker what to do next.
//!
//! # Signal protocol
//!
//! Every task carries a 32-bit event mask whose top bit, [`EventFlags::ALIVE`],
//! means "scheduled, sleeping, or running". Producers OR their bits in
//! together with `ALIVE`; only the producer that observed `ALIVE` clear
//! enqueues the task. Everyone else's bits simply accumulate and are seen by
//! the next run. The worker takes all non-`ALIVE` bits before each run and,
//! after an [`Step::Idle`] return, drops `ALIVE` with a compare-and-swap that
//! fails (forcing another run) if any bit arrived meanwhile.
//!
//! # Ownership
//!
//! The scheduler's task table is the only strong owner of a spawned task.
//! [`TaskHandle`] holds weak references and may outlive the task; signaling a
//! destroyed task is a no-op.

use super::global_lock::GlobalGuard;
use super::{EventFlags, Scheduler, SchedulerContext, TaskId};
use crate::tracing_compat::trace;
use core::fmt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

const NO_PIN: usize = usize::MAX;

/// What a task asks the worker to do after one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Destroy the task.
    Finish,
    /// Go idle until the next signal.
    Idle,
    /// Sleep on the worker's timer heap, then run again.
    WakeAfter(Duration),
}

impl Step {
    /// Interprets the integer run contract: negative finishes, zero idles,
    /// positive sleeps that many milliseconds.
    #[must_use]
    pub const fn from_millis(value: i64) -> Self {
        if value < 0 {
            Self::Finish
        } else if value == 0 {
            Self::Idle
        } else {
            Self::WakeAfter(Duration::from_millis(value as u64))
        }
    }

    /// The integer form of this step (`-1`, `0`, or milliseconds).
    #[must_use]
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Finish => -1,
            Self::Idle => 0,
            Self::WakeAfter(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX).max(1),
        }
    }
}

impl From<i64> for Step {
    fn from(value: i64) -> Self {
        Self::from_millis(value)
    }
}

/// A cooperatively scheduled unit of work.
pub trait Task: Send + 'static {
    /// Runs once. `cx.events()` holds the events delivered since the last
    /// run. Must not block.
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Step;
}

impl<F> Task for F
where
    F: FnMut(&mut TaskContext<'_>) -> Step + Send + 'static,
{
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Step {
        self(cx)
    }
}

/// Scheduler-side state of one task.
pub(crate) struct TaskCore {
    pub(crate) id: TaskId,
    name: String,
    events: AtomicU32,
    pinned: AtomicUsize,
    write_lock: AtomicBool,
    dead: AtomicBool,
    pub(crate) body: Mutex<Option<Box<dyn Task>>>,
}

impl TaskCore {
    pub(crate) fn new(id: TaskId, name: String, body: Box<dyn Task>) -> Self {
        Self {
            id,
            name,
            events: AtomicU32::new(0),
            pinned: AtomicUsize::new(NO_PIN),
            write_lock: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            body: Mutex::new(Some(body)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// ORs `bits` and `ALIVE` into the mask. Returns true if the caller must
    /// enqueue the task.
    pub(crate) fn signal(&self, bits: EventFlags) -> bool {
        if self.dead.load(Ordering::Acquire) {
            return false;
        }
        let prev = self
            .events
            .fetch_or((bits | EventFlags::ALIVE).bits(), Ordering::AcqRel);
        prev & EventFlags::ALIVE.bits() == 0
    }

    /// Takes every pending event, leaving only `ALIVE`.
    pub(crate) fn take_events(&self) -> EventFlags {
        let prev = self
            .events
            .fetch_and(EventFlags::ALIVE.bits(), Ordering::AcqRel);
        EventFlags::from_bits(prev).without(EventFlags::ALIVE)
    }

    /// Drops `ALIVE` if nothing arrived since the last `take_events`.
    pub(crate) fn try_go_idle(&self) -> bool {
        self.events
            .compare_exchange(
                EventFlags::ALIVE.bits(),
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_sleeping(&self) {
        self.events
            .fetch_or(EventFlags::IDLE.bits(), Ordering::AcqRel);
    }

    pub(crate) fn events(&self) -> EventFlags {
        EventFlags::from_bits(self.events.load(Ordering::Acquire))
    }

    pub(crate) fn pin_to(&self, worker: usize) {
        self.pinned.store(worker, Ordering::Release);
    }

    pub(crate) fn pinned(&self) -> Option<usize> {
        match self.pinned.load(Ordering::Acquire) {
            NO_PIN => None,
            worker => Some(worker),
        }
    }

    pub(crate) fn clear_pin(&self) {
        self.pinned.store(NO_PIN, Ordering::Release);
    }

    pub(crate) fn request_write_lock(&self) {
        self.write_lock.store(true, Ordering::Release);
    }

    /// Consumes a pending write-lock request.
    pub(crate) fn take_write_lock(&self) -> bool {
        self.write_lock.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Marks the task destroyed. `ALIVE` stays set, so no later signal can
    /// enqueue it.
    pub(crate) fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("events", &self.events())
            .field("pinned", &self.pinned())
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

/// A weak, cloneable reference used to signal a task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    core: Weak<TaskCore>,
    sched: Weak<SchedulerContext>,
}

impl TaskHandle {
    pub(crate) fn new(core: &Arc<TaskCore>, sched: &Arc<SchedulerContext>) -> Self {
        Self {
            id: core.id,
            core: Arc::downgrade(core),
            sched: Arc::downgrade(sched),
        }
    }

    /// Returns the task's id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Delivers `events` to the task, enqueueing it if it was idle.
    ///
    /// Returns `true` if this call enqueued the task. Signals to a destroyed
    /// task, or after the scheduler is gone, are ignored.
    pub fn signal(&self, events: EventFlags) -> bool {
        let (Some(core), Some(sched)) = (self.core.upgrade(), self.sched.upgrade()) else {
            trace!(task_id = %self.id, "signal to destroyed task ignored");
            return false;
        };
        if !core.signal(events) {
            return false;
        }
        sched.pool.enqueue(self.id, core.pinned());
        true
    }

    /// Signals [`EventFlags::KILL`].
    pub fn kill(&self) -> bool {
        self.signal(EventFlags::KILL)
    }

    /// Requests the global lock in write mode for the task's next run.
    pub fn request_write_lock(&self) {
        if let Some(core) = self.core.upgrade() {
            core.request_write_lock();
        }
    }

    /// Routes the task's next enqueue to `worker`.
    ///
    /// An index with no live worker falls back to round robin.
    pub fn pin_to(&self, worker: usize) {
        if let Some(core) = self.core.upgrade() {
            core.pin_to(worker);
        }
    }

    /// Returns true while the task has not been destroyed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.core.upgrade().is_some_and(|core| !core.is_dead())
    }

    /// Returns the task's name, if it is still alive.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.core.upgrade().map(|core| core.name().to_string())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Per-run view handed to [`Task::run`].
pub struct TaskContext<'a> {
    core: &'a TaskCore,
    handle: &'a TaskHandle,
    scheduler: &'a Scheduler,
    events: EventFlags,
    worker_id: usize,
    guard: Option<GlobalGuard<'a>>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        core: &'a TaskCore,
        handle: &'a TaskHandle,
        scheduler: &'a Scheduler,
        events: EventFlags,
        worker_id: usize,
        guard: GlobalGuard<'a>,
    ) -> Self {
        Self {
            core,
            handle,
            scheduler,
            events,
            worker_id,
            guard: Some(guard),
        }
    }

    /// Events delivered since the previous run.
    #[must_use]
    pub const fn events(&self) -> EventFlags {
        self.events
    }

    /// A handle to the running task, for signaling it later or from elsewhere.
    #[must_use]
    pub const fn handle(&self) -> &TaskHandle {
        self.handle
    }

    /// The owning scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        self.scheduler
    }

    /// Index of the worker executing this run.
    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// The running task's id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.core.id
    }

    /// The running task's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Routes the next enqueue of this task back to the current worker.
    pub fn force_same_thread(&self) {
        self.core.pin_to(self.worker_id);
    }

    /// Requests write mode of the global lock for the next run.
    pub fn request_write_lock(&self) {
        self.core.request_write_lock();
    }

    /// Releases the global lock before `run` returns.
    pub fn global_unlock(&mut self) {
        self.guard = None;
    }

    /// Returns true while this run still holds the global lock.
    #[must_use]
    pub const fn holds_global_lock(&self) -> bool {
        self.guard.is_some()
    }

    /// Returns true if this run holds the global lock in write mode.
    #[must_use]
    pub fn holds_write_lock(&self) -> bool {
        self.guard.as_ref().is_some_and(GlobalGuard::is_write)
    }

    /// Milliseconds on the scheduler clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.core.id)
            .field("events", &self.events)
            .field("worker_id", &self.worker_id)
            .field("holds_global_lock", &self.guard.is_some())
            .finish()
    }
}
