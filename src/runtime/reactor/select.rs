//! `select(2)`-based readiness multiplexer.
//!
//! [`SelectMultiplexer`] keeps two interest sets (read, write) and a
//! descriptor-to-token map under one mutex. `wait` copies the sets, calls
//! `select` without holding the lock, then hands back the ready descriptors
//! one per call. The results of one `select` call are walked with a cursor
//! that survives across calls (reads first, then writes) before `select`
//! runs again.
//!
//! A self-pipe (a non-blocking socket pair) is always part of the read set;
//! `arm`, `disarm`, `retire`, and `wake` write one byte to it so a blocked
//! `select` picks up the new interest sets at once. Wakes coalesce: while a
//! byte is pending no further bytes are written.
//!
//! # Errors
//!
//! `EINTR` retries the call. `EBADF` means some registered descriptor was
//! closed behind the multiplexer's back; the registrations whose descriptors
//! are no longer open are dropped and the call retries. Every other error is
//! returned from `wait`.
//!
//! NOTE: This module uses unsafe for `fd_set` manipulation and the `select`
//! and `fcntl` calls. The invariants are documented inline.

#![allow(unsafe_code)]

use super::{Interest, Multiplexer, ReadyEvent, Token, Wait};
use crate::runtime::config::DEFAULT_SELECT_TIMEOUT;
use crate::tracing_compat::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const FD_LIMIT: RawFd = libc::FD_SETSIZE as RawFd;
const WAKE_DRAIN_BUF: usize = 4096;
const MAX_SELECT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Owned, always-initialized `fd_set`.
#[derive(Clone, Copy)]
struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        let mut raw = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO writes every byte of the set, so it is initialized
        // when `assume_init` runs.
        unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            Self(raw.assume_init())
        }
    }

    // Callers guarantee 0 <= fd < FD_LIMIT for the three accessors below.

    fn insert(&mut self, fd: RawFd) {
        // SAFETY: fd is within the set's bit range; the set is initialized.
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn remove(&mut self, fd: RawFd) {
        // SAFETY: fd is within the set's bit range; the set is initialized.
        unsafe { libc::FD_CLR(fd, &mut self.0) }
    }

    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: fd is within the set's bit range; the set is initialized.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

fn fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table entry.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Sets `O_NONBLOCK` on `fd`.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL read and write the file status flags of a
    // descriptor the caller owns; no memory is passed to the kernel.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if flags & libc::O_NONBLOCK == 0
            && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn check_fd(fd: RawFd) -> io::Result<()> {
    if (0..FD_LIMIT).contains(&fd) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("descriptor {fd} outside select range 0..{FD_LIMIT}"),
        ))
    }
}

struct SelectState {
    read_interest: FdSet,
    write_interest: FdSet,
    tokens: HashMap<RawFd, Token>,
    /// Highest descriptor with a token, or -1.
    max_fd: RawFd,

    // Results of the last `select` call, walked one event per `wait`.
    ready_read: FdSet,
    ready_write: FdSet,
    cursor: RawFd,
    draining_reads: bool,
    remaining: usize,

    /// Retired descriptors, closed by the waiting thread between selects.
    to_close: Vec<OwnedFd>,
}

impl SelectState {
    fn new() -> Self {
        Self {
            read_interest: FdSet::new(),
            write_interest: FdSet::new(),
            tokens: HashMap::new(),
            max_fd: -1,
            ready_read: FdSet::new(),
            ready_write: FdSet::new(),
            cursor: 0,
            draining_reads: true,
            remaining: 0,
            to_close: Vec::new(),
        }
    }

    fn forget(&mut self, fd: RawFd) -> bool {
        self.read_interest.remove(fd);
        self.write_interest.remove(fd);
        self.ready_read.remove(fd);
        self.ready_write.remove(fd);
        let removed = self.tokens.remove(&fd).is_some();
        if removed && fd == self.max_fd {
            self.max_fd = self.tokens.keys().copied().max().unwrap_or(-1);
        }
        removed
    }

    fn begin_drain(&mut self, reads: FdSet, writes: FdSet, count: usize) {
        self.ready_read = reads;
        self.ready_write = writes;
        self.cursor = 0;
        self.draining_reads = true;
        self.remaining = count;
    }

    /// Next undelivered result of the last `select` call.
    ///
    /// Results for descriptors above a shrunken `max_fd`, or no longer armed
    /// in that direction, are skipped.
    fn next_ready(&mut self) -> Option<ReadyEvent> {
        while self.remaining > 0 {
            if self.cursor > self.max_fd {
                if self.draining_reads {
                    self.draining_reads = false;
                    self.cursor = 0;
                    continue;
                }
                self.remaining = 0;
                break;
            }

            let fd = self.cursor;
            self.cursor += 1;
            let (hit, armed, ready) = if self.draining_reads {
                (
                    self.ready_read.contains(fd),
                    self.read_interest.contains(fd),
                    Interest::READABLE,
                )
            } else {
                (
                    self.ready_write.contains(fd),
                    self.write_interest.contains(fd),
                    Interest::WRITABLE,
                )
            };
            if !hit {
                continue;
            }
            self.remaining -= 1;
            if !armed {
                continue;
            }
            let Some(&token) = self.tokens.get(&fd) else {
                continue;
            };

            // One-shot: the owner must arm again to hear from fd.
            self.read_interest.remove(fd);
            self.write_interest.remove(fd);
            return Some(ReadyEvent { fd, token, ready });
        }
        None
    }

    fn close_retired(&mut self) {
        if !self.to_close.is_empty() {
            trace!(count = self.to_close.len(), "closing retired descriptors");
            self.to_close.clear();
        }
    }

    fn purge_closed(&mut self) {
        let stale: Vec<RawFd> = self
            .tokens
            .keys()
            .copied()
            .filter(|&fd| !fd_is_open(fd))
            .collect();
        for fd in stale {
            warn!(fd, "dropping registration for a descriptor closed while armed");
            self.forget(fd);
        }
    }
}

/// `select(2)` multiplexer with a self-pipe wake and deferred close.
pub struct SelectMultiplexer {
    state: Mutex<SelectState>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
    wake_pending: AtomicBool,
    select_timeout: Duration,
}

impl SelectMultiplexer {
    /// Creates a multiplexer whose unbounded waits return every 15 seconds.
    pub fn new() -> io::Result<Self> {
        Self::with_timeout(DEFAULT_SELECT_TIMEOUT)
    }

    /// Creates a multiplexer whose unbounded waits return after `select_timeout`.
    pub fn with_timeout(select_timeout: Duration) -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        check_fd(wake_rx.as_raw_fd())?;
        debug!(
            wake_fd = wake_rx.as_raw_fd(),
            timeout_ms = select_timeout.as_millis() as u64,
            "select multiplexer created"
        );
        Ok(Self {
            state: Mutex::new(SelectState::new()),
            wake_rx,
            wake_tx,
            wake_pending: AtomicBool::new(false),
            select_timeout,
        })
    }

    /// Highest descriptor that still has a cookie, if any.
    #[must_use]
    pub fn max_fd(&self) -> Option<RawFd> {
        let max = self.state.lock().max_fd;
        (max >= 0).then_some(max)
    }

    /// Number of retired descriptors still waiting to be closed.
    #[must_use]
    pub fn pending_close_count(&self) -> usize {
        self.state.lock().to_close.len()
    }

    /// Returns true if `fd` is currently armed in any direction.
    #[must_use]
    pub fn is_armed(&self, fd: RawFd) -> bool {
        if check_fd(fd).is_err() {
            return false;
        }
        let state = self.state.lock();
        state.read_interest.contains(fd) || state.write_interest.contains(fd)
    }

    fn drain_wake_pipe(&self) {
        self.wake_pending.store(false, Ordering::Release);
        let mut buf = [0u8; WAKE_DRAIN_BUF];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(n) if n == buf.len() => continue,
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "failed to drain wake pipe");
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for SelectMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SelectMultiplexer")
            .field("registrations", &state.tokens.len())
            .field("max_fd", &state.max_fd)
            .field("pending_results", &state.remaining)
            .field("pending_close", &state.to_close.len())
            .field("wake_fd", &self.wake_rx.as_raw_fd())
            .finish_non_exhaustive()
    }
}

impl Multiplexer for SelectMultiplexer {
    fn arm(&self, fd: RawFd, interest: Interest, token: Token) -> io::Result<()> {
        check_fd(fd)?;
        if token.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "token 0 is reserved",
            ));
        }
        if interest.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "arm requires a readiness direction",
            ));
        }
        {
            let mut state = self.state.lock();
            if let Some(&owner) = state.tokens.get(&fd) {
                if owner != token {
                    warn!(fd, owner = owner.0, token = token.0, "descriptor already registered");
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "descriptor armed under another token",
                    ));
                }
            }
            state.tokens.insert(fd, token);
            if interest.is_readable() {
                state.read_interest.insert(fd);
            }
            if interest.is_writable() {
                state.write_interest.insert(fd);
            }
            state.max_fd = state.max_fd.max(fd);
        }
        trace!(fd, token = token.0, ?interest, "descriptor armed");
        self.wake()
    }

    fn disarm(&self, fd: RawFd) -> io::Result<()> {
        check_fd(fd)?;
        let removed = self.state.lock().forget(fd);
        if removed {
            trace!(fd, "descriptor disarmed");
            self.wake()?;
        }
        Ok(())
    }

    fn retire(&self, fd: OwnedFd) -> io::Result<()> {
        let raw = fd.as_raw_fd();
        check_fd(raw)?;
        {
            let mut state = self.state.lock();
            state.forget(raw);
            state.to_close.push(fd);
        }
        trace!(fd = raw, "descriptor retired");
        self.wake()
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Wait> {
        let timeout = timeout.unwrap_or(self.select_timeout).min(MAX_SELECT_WAIT);
        let wake_fd = self.wake_rx.as_raw_fd();

        loop {
            let (mut reads, mut writes, nfds) = {
                let mut state = self.state.lock();
                if let Some(event) = state.next_ready() {
                    trace!(fd = event.fd, token = event.token.0, ready = ?event.ready, "readiness delivered");
                    return Ok(Wait::Ready(event));
                }
                state.close_retired();
                let mut reads = state.read_interest;
                reads.insert(wake_fd);
                (reads, state.write_interest, state.max_fd.max(wake_fd) + 1)
            };

            let mut tv = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
            };
            // SAFETY: both sets are initialized copies owned by this frame,
            // every member is below `nfds <= FD_LIMIT`, and `tv` outlives the call.
            let rc = unsafe {
                libc::select(
                    nfds,
                    &mut reads.0,
                    &mut writes.0,
                    std::ptr::null_mut(),
                    &mut tv,
                )
            };

            if rc < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EBADF) => {
                        self.state.lock().purge_closed();
                        continue;
                    }
                    _ => {
                        error!(error = %err, "select failed");
                        return Err(err);
                    }
                }
            }

            let mut count = rc as usize;
            let woken = reads.contains(wake_fd);
            if woken {
                reads.remove(wake_fd);
                count -= 1;
                self.drain_wake_pipe();
            }

            let mut state = self.state.lock();
            state.close_retired();
            if rc == 0 {
                return Ok(Wait::TimedOut);
            }
            state.begin_drain(reads, writes, count);
            if count == 0 {
                return Ok(Wait::Woken);
            }
        }
    }

    fn wake(&self) -> io::Result<()> {
        if self.wake_pending.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match (&self.wake_tx).write(&[1]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                self.wake_pending.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn registration_count(&self) -> usize {
        self.state.lock().tokens.len()
    }
}
