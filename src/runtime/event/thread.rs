//! The thread that waits on the multiplexer and dispatches readiness.

use super::EventDispatcher;
use crate::error::{Error, Result};
use crate::runtime::reactor::Wait;
use crate::runtime::{Scheduler, SchedulerContext};
use crate::tracing_compat::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause after a failed wait, so a persistent OS error cannot spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub(crate) struct EventThread {
    stop: Arc<AtomicBool>,
    dispatcher: Arc<EventDispatcher>,
    handle: Option<JoinHandle<()>>,
}

impl EventThread {
    pub(crate) fn start(ctx: &Arc<SchedulerContext>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::clone(&ctx.events);
        let name = format!("{}-events", ctx.config.thread_name_prefix);

        let handle = {
            let stop = Arc::clone(&stop);
            let dispatcher = Arc::clone(&dispatcher);
            let ctx = Arc::downgrade(ctx);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || event_loop(&stop, &dispatcher, &ctx))
                .map_err(|e| Error::thread_spawn(&name, e))?
        };
        debug!(thread = %name, "event thread started");
        Ok(Self {
            stop,
            dispatcher,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.dispatcher.multiplexer().wake() {
            warn!(error = %e, "failed to wake event thread");
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("event thread exited by panic");
            }
        }
        debug!("event thread stopped");
    }
}

fn event_loop(stop: &AtomicBool, dispatcher: &EventDispatcher, ctx: &Weak<SchedulerContext>) {
    while !stop.load(Ordering::Acquire) {
        match dispatcher.multiplexer().wait(None) {
            Ok(Wait::Ready(event)) => {
                let Some(ctx) = ctx.upgrade() else {
                    break;
                };
                dispatcher.dispatch(&Scheduler::from_context(ctx), event);
            }
            Ok(Wait::Woken | Wait::TimedOut) => trace!("event thread idle wake"),
            Err(e) => {
                error!(error = %e, "multiplexer wait failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
