//! Scheduler configuration types.
//!
//! These types hold the concrete values that drive scheduler behavior. In
//! most cases use [`SchedulerBuilder`](super::builder::SchedulerBuilder)
//! rather than creating a [`SchedulerConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"streamsched-worker"` |
//! | `global_lock_max_wait` | 5 s |
//! | `min_sleep` | 10 ms (also the lowest accepted value) |
//! | `select_timeout` | 15 s |
//! | `event_thread` | true |
//! | `on_task_panic` | `Abort` |

use std::time::Duration;

/// Default floor for a task's requested sleep. `normalize` never lets the
/// floor drop below it.
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_millis(10);
/// Default bound on a single `select` call.
pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default global lock wait before a warning is logged.
pub const DEFAULT_GLOBAL_LOCK_MAX_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_THREAD_PREFIX: &str = "streamsched-worker";

/// Response policy when a task's `run` panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPanicResponse {
    /// Log the panic and abort the process. Shared state touched by the
    /// task is presumed corrupt.
    Abort,
    /// Log the panic, destroy the task, and keep the worker running.
    Log,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads started by `build()`. Zero is allowed; add
    /// workers later with `Scheduler::add_workers`.
    pub worker_threads: usize,
    /// Stack size per worker thread.
    pub thread_stack_size: usize,
    /// Name prefix for worker threads (`{prefix}-{id}`).
    pub thread_name_prefix: String,
    /// Slice after which a blocked global lock acquisition logs a warning.
    pub global_lock_max_wait: Duration,
    /// Floor applied to every requested sleep and to queue waits. Values
    /// below 10 ms are raised to 10 ms.
    pub min_sleep: Duration,
    /// Bound on a single multiplexer wait.
    pub select_timeout: Duration,
    /// Start the readiness thread on `build()`.
    pub event_thread: bool,
    /// What to do when a task panics.
    pub on_task_panic: TaskPanicResponse,
}

impl SchedulerConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_PREFIX.to_string();
        }
        if self.global_lock_max_wait.is_zero() {
            self.global_lock_max_wait = DEFAULT_GLOBAL_LOCK_MAX_WAIT;
        }
        if self.min_sleep < DEFAULT_MIN_SLEEP {
            self.min_sleep = DEFAULT_MIN_SLEEP;
        }
        if self.select_timeout.is_zero() {
            self.select_timeout = DEFAULT_SELECT_TIMEOUT;
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            global_lock_max_wait: DEFAULT_GLOBAL_LOCK_MAX_WAIT,
            min_sleep: DEFAULT_MIN_SLEEP,
            select_timeout: DEFAULT_SELECT_TIMEOUT,
            event_thread: true,
            on_task_panic: TaskPanicResponse::Abort,
        }
    }
}
