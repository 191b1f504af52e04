//! Per-descriptor event contexts.
//!
//! An [`EventContext`] owns one non-blocking descriptor, its multiplexer
//! registration, and a registry entry mapping its id (the cookie) back to
//! the task that should hear about readiness.
//!
//! The first [`EventContext::request_event`] allocates the id, registers the
//! entry, and arms the descriptor. Later calls only re-arm the interest bits
//! under the same id.
//!
//! # Transfer
//!
//! [`EventContext::transfer_from`] moves a live registration between
//! contexts. The source entry is first marked as forwarding to the
//! destination (under the source entry lock), then the registry is pointed at
//! the destination. A delivery that already resolved the source entry
//! follows the forward, so no readiness is lost or delivered to the old
//! owner after the transfer returns.
//!
//! # Cleanup
//!
//! Cleanup retires the entry under its lock before the descriptor leaves the
//! multiplexer. A handler still running on the event thread finishes first,
//! and a delivery resolved to the entry afterwards is dropped, so nothing
//! re-arms a descriptor that is already queued for closing.

use super::EventDispatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::reactor::{select, Interest, ReadyEvent, Token};
use crate::runtime::{EventFlags, Scheduler, TaskHandle};
use crate::tracing_compat::{debug, trace, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;

/// Reacts to readiness of a context's descriptor.
///
/// Runs on the event thread with the context's entry lock held; it must not
/// block, and must not clean up or drop its own context. The default
/// signals the bound task with [`EventFlags::READ`].
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one readiness event.
    fn process_event(&self, event: &ContextEvent<'_>) {
        if let Some(task) = event.task() {
            task.signal(EventFlags::READ);
        }
    }
}

struct SignalTask;

impl EventHandler for SignalTask {}

/// A readiness event resolved to its context.
pub struct ContextEvent<'a> {
    ready: ReadyEvent,
    context_id: u32,
    task: Option<&'a TaskHandle>,
    scheduler: &'a Scheduler,
}

impl<'a> ContextEvent<'a> {
    /// The direction that fired.
    #[must_use]
    pub const fn ready(&self) -> Interest {
        self.ready.ready
    }

    /// The ready descriptor.
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.ready.fd
    }

    /// The context's id.
    #[must_use]
    pub const fn context_id(&self) -> u32 {
        self.context_id
    }

    /// The task bound to the context, if any.
    #[must_use]
    pub const fn task(&self) -> Option<&'a TaskHandle> {
        self.task
    }

    /// The owning scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Arms the descriptor again under the same cookie.
    ///
    /// Only reachable from a handler, which never runs on a retired entry.
    pub fn rearm(&self, interest: Interest) -> io::Result<()> {
        self.scheduler
            .dispatcher()
            .multiplexer()
            .arm(self.ready.fd, interest, self.ready.token)
    }
}

impl fmt::Debug for ContextEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEvent")
            .field("ready", &self.ready)
            .field("context_id", &self.context_id)
            .field("task", &self.task.map(TaskHandle::id))
            .finish()
    }
}

#[derive(Default)]
struct EntryState {
    task: Option<TaskHandle>,
    handler: Option<Arc<dyn EventHandler>>,
    forward: Option<Arc<ContextEntry>>,
    retired: bool,
}

/// Registry-side half of a context: what a cookie resolves to.
pub(crate) struct ContextEntry {
    state: Mutex<EntryState>,
}

impl ContextEntry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EntryState::default()),
        }
    }

    /// Delivers `ready` to this entry, following transfer forwards.
    pub(crate) fn dispatch(self: &Arc<Self>, ready: ReadyEvent, context_id: u32, scheduler: &Scheduler) {
        let mut current = Arc::clone(self);
        loop {
            let state = current.state.lock();
            if let Some(next) = state.forward.clone() {
                drop(state);
                trace!(context_id, "following transferred context");
                current = next;
                continue;
            }
            if state.retired {
                trace!(context_id, "dropping readiness for retired context");
                return;
            }
            let event = ContextEvent {
                ready,
                context_id,
                task: state.task.as_ref(),
                scheduler,
            };
            match &state.handler {
                Some(handler) => handler.process_event(&event),
                None => SignalTask.process_event(&event),
            }
            return;
        }
    }
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ContextEntry")
            .field("task", &state.task.as_ref().map(TaskHandle::id))
            .field("handler", &state.handler.is_some())
            .field("forwarded", &state.forward.is_some())
            .field("retired", &state.retired)
            .finish()
    }
}

/// One descriptor's readiness, bound to a task.
pub struct EventContext {
    fd: Option<OwnedFd>,
    id: Option<u32>,
    armed: bool,
    auto_cleanup: bool,
    entry: Arc<ContextEntry>,
    dispatcher: Arc<EventDispatcher>,
}

impl EventContext {
    /// Creates an unbound context on the scheduler's event dispatcher.
    #[must_use]
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            fd: None,
            id: None,
            armed: false,
            auto_cleanup: true,
            entry: Arc::new(ContextEntry::new()),
            dispatcher: Arc::clone(scheduler.dispatcher()),
        }
    }

    /// Takes ownership of `fd`. A previously bound descriptor is cleaned up.
    pub fn bind(&mut self, fd: impl Into<OwnedFd>) {
        self.cleanup();
        self.fd = Some(fd.into());
    }

    /// Puts the bound descriptor in non-blocking mode.
    pub fn set_non_blocking(&self) -> Result<()> {
        let fd = self.raw_fd()?;
        select::set_nonblocking(fd).map_err(|e| {
            Error::new(ErrorKind::Io)
                .with_message(format!("fcntl(O_NONBLOCK) on {fd}"))
                .with_source(e)
        })
    }

    /// Binds the task signaled by the default handler.
    pub fn set_task(&self, task: TaskHandle) {
        self.entry.state.lock().task = Some(task);
    }

    /// Replaces the default dispatch for this context.
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        self.entry.state.lock().handler = Some(handler);
    }

    /// Arms the descriptor for `interest`.
    ///
    /// The first call allocates the context id and registers it; later calls
    /// re-arm under the same id.
    pub fn request_event(&mut self, interest: Interest) -> Result<()> {
        let fd = self.raw_fd()?;
        let id = match self.id {
            Some(id) => id,
            None => {
                let id = self.dispatcher.registry.register(Arc::clone(&self.entry))?;
                self.id = Some(id);
                debug!(context_id = id, fd, "event context registered");
                id
            }
        };
        self.dispatcher
            .multiplexer()
            .arm(fd, interest, Token::new(id as usize))?;
        self.armed = true;
        Ok(())
    }

    /// Moves `source`'s descriptor, id, and registration into `self`.
    ///
    /// Whatever `self` held before is cleaned up. `source` keeps its task and
    /// handler but is left unbound.
    pub fn transfer_from(&mut self, source: &mut Self) {
        self.cleanup();
        self.fd = source.fd.take();
        self.armed = std::mem::take(&mut source.armed);
        self.id = source.id.take();

        let forwarded = std::mem::replace(&mut source.entry, Arc::new(ContextEntry::new()));
        {
            let mut old = forwarded.state.lock();
            let mut fresh = source.entry.state.lock();
            fresh.task = old.task.take();
            fresh.handler = old.handler.take();
            old.forward = Some(Arc::clone(&self.entry));
        }
        if let Some(id) = self.id {
            self.dispatcher.registry.replace(id, Arc::clone(&self.entry));
            debug!(context_id = id, fd = ?self.fd(), "event context transferred");
        }
    }

    /// Unregisters and closes the descriptor. Idempotent.
    ///
    /// An armed descriptor is retired to the multiplexer and closed by the
    /// event thread; an unarmed one is closed here.
    pub fn cleanup(&mut self) {
        if let Some(id) = self.id.take() {
            let retired = self.retire_entry();
            self.dispatcher.registry.remove(id, &retired);
            trace!(context_id = id, "event context unregistered");
        }
        if let Some(fd) = self.fd.take() {
            if std::mem::take(&mut self.armed) {
                let raw = fd.as_raw_fd();
                if let Err(e) = self.dispatcher.multiplexer().retire(fd) {
                    warn!(fd = raw, error = %e, "failed to retire descriptor");
                }
            }
        }
    }

    /// When disabled, dropping the context unregisters it but leaves the
    /// descriptor open for whoever owns it now.
    pub fn set_auto_cleanup(&mut self, enabled: bool) {
        self.auto_cleanup = enabled;
    }

    /// The bound descriptor.
    #[must_use]
    pub fn fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// The context id, once registered.
    #[must_use]
    pub const fn id(&self) -> Option<u32> {
        self.id
    }

    /// Returns true once the descriptor has a multiplexer registration.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.fd().ok_or_else(|| {
            Error::new(ErrorKind::NotBound).with_message("event context has no descriptor")
        })
    }

    /// Swaps in a fresh entry carrying the task and handler, and marks the
    /// old one retired. Blocks while a handler runs on the old entry.
    fn retire_entry(&mut self) -> Arc<ContextEntry> {
        let retired = std::mem::replace(&mut self.entry, Arc::new(ContextEntry::new()));
        {
            let mut old = retired.state.lock();
            let mut fresh = self.entry.state.lock();
            fresh.task = old.task.take();
            fresh.handler = old.handler.take();
            old.retired = true;
        }
        retired
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            let retired = self.retire_entry();
            self.dispatcher.registry.remove(id, &retired);
        }
        if let Some(fd) = self.fd.take() {
            if std::mem::take(&mut self.armed) {
                let raw = fd.as_raw_fd();
                if let Err(e) = self.dispatcher.multiplexer().disarm(raw) {
                    warn!(fd = raw, error = %e, "failed to disarm released descriptor");
                }
            }
            let raw = fd.into_raw_fd();
            trace!(fd = raw, "descriptor released without close");
        }
    }
}

impl Drop for EventContext {
    fn drop(&mut self) {
        if self.auto_cleanup {
            self.cleanup();
        } else {
            self.release();
        }
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("fd", &self.fd())
            .field("id", &self.id)
            .field("armed", &self.armed)
            .field("auto_cleanup", &self.auto_cleanup)
            .finish_non_exhaustive()
    }
}
