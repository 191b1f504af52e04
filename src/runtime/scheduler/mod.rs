//! Worker pool with per-worker ready queues and timer heaps.
//!
//! - [`links`]: generation-checked per-task link storage
//! - [`intrusive`]: index-linked FIFO used by the ready queues
//! - [`intrusive_heap`]: min-heap of sleeping tasks keyed by wake time
//! - `queue`, `worker`, `pool`: the threads and the routing between them

pub mod intrusive;
pub mod intrusive_heap;
pub mod links;
pub(crate) mod pool;
pub(crate) mod queue;
pub(crate) mod worker;

pub use intrusive::IntrusiveRing;
pub use intrusive_heap::TimerHeap;
pub use worker::WorkerId;
