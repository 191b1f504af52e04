//! Passive TCP sockets that hand accepted connections to a factory.

use super::context::{ContextEvent, EventContext, EventHandler};
use crate::error::Result;
use crate::runtime::reactor::Interest;
use crate::runtime::Scheduler;
use crate::tracing_compat::{debug, error, trace, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::OwnedFd;
use std::sync::Arc;

/// Builds the session for each accepted connection.
///
/// Implementations typically spawn a task, give it an [`EventContext`]
/// bound to `stream`, and signal it with `START`.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Takes ownership of a freshly accepted, non-blocking stream.
    fn on_connection(&self, scheduler: &Scheduler, stream: TcpStream, peer: SocketAddr) -> Result<()>;
}

struct AcceptHandler {
    listener: TcpListener,
    factory: Arc<dyn ConnectionFactory>,
}

impl AcceptHandler {
    fn accept_pending(&self, scheduler: &Scheduler) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(%peer, error = %e, "dropping connection: cannot set non-blocking");
                        continue;
                    }
                    trace!(%peer, "connection accepted");
                    if let Err(e) = self.factory.on_connection(scheduler, stream, peer) {
                        warn!(%peer, error = %e, "connection factory failed");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {}
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

impl EventHandler for AcceptHandler {
    fn process_event(&self, event: &ContextEvent<'_>) {
        self.accept_pending(event.scheduler());
        if let Err(e) = event.rearm(Interest::READABLE) {
            error!(fd = event.fd(), error = %e, "failed to re-arm listener");
        }
    }
}

/// A listening socket driven by the event thread.
///
/// Dropping the listener unregisters it and closes the socket.
#[derive(Debug)]
pub struct Listener {
    context: EventContext,
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds `addr` and starts accepting into `factory`.
    pub fn bind(
        scheduler: &Scheduler,
        addr: impl ToSocketAddrs,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let acceptor = listener.try_clone()?;

        let mut context = EventContext::new(scheduler);
        context.bind(OwnedFd::from(listener));
        context.set_handler(Arc::new(AcceptHandler {
            listener: acceptor,
            factory,
        }));
        context.request_event(Interest::READABLE)?;
        debug!(%local_addr, context_id = ?context.id(), "listener bound");
        Ok(Self {
            context,
            local_addr,
        })
    }

    /// The bound address (useful with port 0).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The listener's event context id.
    #[must_use]
    pub fn context_id(&self) -> Option<u32> {
        self.context.id()
    }
}
