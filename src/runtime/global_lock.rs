//! The scheduler-wide read/write lock held around every task run.
//!
//! Ordinary runs share the lock in read mode and proceed in parallel. A task
//! that asked for exclusivity (see
//! [`TaskHandle::request_write_lock`](super::TaskHandle::request_write_lock))
//! gets write mode, so no other task runs while it does.
//!
//! The lock prefers writers (`parking_lot` fairness). Acquisition waits in
//! slices of `max_wait`; every slice that expires logs a warning and the wait
//! continues, so a stuck writer is visible without aborting anyone.

use crate::tracing_compat::warn;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Scheduler-wide read/write lock.
#[derive(Debug)]
pub struct GlobalLock {
    lock: RwLock<()>,
    max_wait: Duration,
}

/// Guard held by a worker for the duration of one `run`.
#[derive(Debug)]
pub enum GlobalGuard<'a> {
    /// Shared access.
    Read(RwLockReadGuard<'a, ()>),
    /// Exclusive access.
    Write(RwLockWriteGuard<'a, ()>),
}

impl GlobalGuard<'_> {
    /// Returns true for an exclusive guard.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

impl GlobalLock {
    /// Creates a lock whose waiters log after every `max_wait` slice.
    #[must_use]
    pub fn new(max_wait: Duration) -> Self {
        Self {
            lock: RwLock::new(()),
            max_wait,
        }
    }

    /// Acquires the lock in the requested mode.
    pub fn acquire(&self, write: bool) -> GlobalGuard<'_> {
        let mut waited = Duration::ZERO;
        loop {
            let guard = if write {
                self.lock.try_write_for(self.max_wait).map(GlobalGuard::Write)
            } else {
                self.lock.try_read_for(self.max_wait).map(GlobalGuard::Read)
            };
            if let Some(guard) = guard {
                return guard;
            }
            waited += self.max_wait;
            warn!(
                write,
                waited_ms = waited.as_millis() as u64,
                "global lock wait exceeded ceiling"
            );
        }
    }

    /// Acquires shared access.
    pub fn read(&self) -> GlobalGuard<'_> {
        self.acquire(false)
    }

    /// Acquires exclusive access.
    pub fn write(&self) -> GlobalGuard<'_> {
        self.acquire(true)
    }

    /// Returns true if some thread holds the lock exclusively.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.lock.is_locked_exclusive()
    }

    /// Returns true if the lock is held in any mode.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}
