//! Readiness delivery from the multiplexer to tasks.
//!
//! ```text
//!  Multiplexer::wait ──▶ Token(id) ──▶ ContextRegistry ──▶ ContextEntry
//!                                                             │
//!                                      EventHandler::process_event
//!                                                             │
//!                                               TaskHandle::signal(READ)
//! ```
//!
//! The [`EventDispatcher`] pairs the multiplexer with the id registry. The
//! event thread (or a caller driving [`Scheduler::poll_events`] by hand)
//! waits on it and dispatches one event at a time.

pub mod context;
pub mod listener;
pub(crate) mod registry;
pub(crate) mod thread;

pub use context::{ContextEvent, EventContext, EventHandler};
pub use listener::{ConnectionFactory, Listener};
pub use registry::MAX_CONTEXT_ID;

use crate::runtime::reactor::{Multiplexer, ReadyEvent, Wait};
use crate::runtime::Scheduler;
use crate::tracing_compat::trace;
use registry::ContextRegistry;
use std::io;
use std::time::Duration;

/// Multiplexer plus the registry resolving its cookies.
#[derive(Debug)]
pub struct EventDispatcher {
    mux: Box<dyn Multiplexer>,
    pub(crate) registry: ContextRegistry,
}

impl EventDispatcher {
    pub(crate) fn new(mux: Box<dyn Multiplexer>) -> Self {
        Self {
            mux,
            registry: ContextRegistry::new(),
        }
    }

    /// The underlying multiplexer.
    #[must_use]
    pub fn multiplexer(&self) -> &dyn Multiplexer {
        self.mux.as_ref()
    }

    /// Number of registered event contexts.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.registry.len()
    }

    /// Waits for one multiplexer result and dispatches it if it is a
    /// readiness event.
    pub(crate) fn poll(&self, scheduler: &Scheduler, timeout: Option<Duration>) -> io::Result<Wait> {
        let wait = self.mux.wait(timeout)?;
        if let Wait::Ready(event) = wait {
            self.dispatch(scheduler, event);
        }
        Ok(wait)
    }

    /// Resolves the event's cookie and hands it to the context's handler.
    ///
    /// Cookies of contexts cleaned up since arming are dropped.
    pub(crate) fn dispatch(&self, scheduler: &Scheduler, event: ReadyEvent) {
        let Ok(id) = u32::try_from(event.token.0) else {
            trace!(token = event.token.0, "token outside context id range");
            return;
        };
        match self.registry.resolve(id) {
            Some(entry) => entry.dispatch(event, id, scheduler),
            None => trace!(context_id = id, fd = event.fd, "readiness for a departed context"),
        }
    }
}
