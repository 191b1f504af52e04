//! Streamsched: the cooperative scheduling core of a streaming media server.
//!
//! # Overview
//!
//! Streamsched multiplexes thousands of sockets and timers across a small,
//! fixed pool of worker threads. Nothing here spawns a thread per
//! connection: sessions are [`Task`]s that sleep until an event bit is
//! signaled, run a short non-blocking step, and hand control back.
//!
//! # Core Guarantees
//!
//! - **At most one run**: a task's `run` never executes on two threads at once
//! - **No lost signals**: every signal is observed by some later `run`
//! - **Exactly-once enqueue**: a burst of signals enqueues the task once
//! - **Single owner**: only the scheduler frees a task, after it reports [`Step::Finish`]
//! - **Deferred close**: a retired descriptor is closed on the event thread only
//!
//! # Module Structure
//!
//! - [`runtime`]: the scheduler context, worker pool, tasks, and readiness layer
//! - [`runtime::reactor`]: the `select(2)` multiplexer
//! - [`runtime::event`]: event contexts, the id registry, and the event thread
//! - [`runtime::scheduler`]: index-linked queues, timer heaps, and workers
//! - [`util`]: generation-checked arena
//! - [`error`]: error types
//! - [`tracing_compat`]: logging shim over `tracing`
//!
//! # Example
//!
//! ```ignore
//! use streamsched::{EventFlags, Scheduler, Step};
//!
//! let scheduler = Scheduler::builder().worker_threads(2).build()?;
//! let handle = scheduler.spawn("hello", |cx: &mut streamsched::TaskContext<'_>| {
//!     if cx.events().contains(EventFlags::START) {
//!         println!("started on worker {}", cx.worker_id());
//!     }
//!     Step::Finish
//! })?;
//! handle.signal(EventFlags::START);
//! scheduler.shutdown();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod runtime;
pub mod tracing_compat;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{BuildError, Error, ErrorKind, Recoverability, Result};
pub use runtime::event::{
    ConnectionFactory, ContextEvent, EventContext, EventHandler, Listener,
};
pub use runtime::reactor::{Interest, Multiplexer, ReadyEvent, SelectMultiplexer, Token, Wait};
pub use runtime::{
    EventFlags, Scheduler, SchedulerBuilder, SchedulerConfig, Step, Task, TaskContext,
    TaskHandle, TaskId, TaskPanicResponse,
};
