//! Readiness multiplexing for the event thread.
//!
//! The [`Multiplexer`] trait is the seam between the event thread and the OS
//! readiness primitive. The production backend is [`SelectMultiplexer`],
//! built on `select(2)`.
//!
//! # Model
//!
//! ```text
//!   any thread                         event thread
//!  ┌──────────────┐   arm / disarm   ┌──────────────────────────────┐
//!  │ EventContext │ ───────────────▶ │ interest sets + token map    │
//!  └──────────────┘   (one mutex)    │            │                 │
//!          │                         │            ▼                 │
//!          └──── wake() ──────────▶  │  select(copies) ─▶ drain one │──▶ Wait::Ready
//!                self-pipe byte      └──────────────────────────────┘
//! ```
//!
//! # Level Triggering, Consumed on Delivery
//!
//! Registrations are level-triggered but one-shot: a descriptor delivered by
//! [`Multiplexer::wait`] is removed from both interest sets and stays silent
//! until it is armed again, however long it stays ready.
//!
//! # Deferred Close
//!
//! [`Multiplexer::retire`] takes ownership of a descriptor, disarms it, and
//! closes it only from the waiting thread once the `select` call that might
//! still reference it has returned. A new socket reusing the number can
//! therefore never receive the old socket's readiness.

pub mod interest;
pub mod select;

pub use interest::Interest;
pub use select::SelectMultiplexer;

use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::time::Duration;

/// Cookie attached to a registration. Zero is never a valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(val: usize) -> Self {
        Self(val)
    }

    /// Returns true for the reserved zero token.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    /// The descriptor that became ready.
    pub fd: RawFd,
    /// The cookie it was armed with.
    pub token: Token,
    /// The direction that fired (exactly one of readable or writable).
    pub ready: Interest,
}

/// Result of one [`Multiplexer::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// A single armed descriptor is ready.
    Ready(ReadyEvent),
    /// Only the wake pipe fired.
    Woken,
    /// The timeout elapsed with nothing ready.
    TimedOut,
}

/// Readiness engine mapping descriptors to tokens.
///
/// `arm`, `disarm`, `retire`, and `wake` may be called from any thread.
/// `wait` is called by the single event thread.
pub trait Multiplexer: Send + Sync + std::fmt::Debug {
    /// Adds `interest` for `fd` and records `token` as its cookie.
    ///
    /// Re-arming under the same token only adds interest bits. A descriptor
    /// registered under a different token is left alone and the call fails
    /// with `AlreadyExists`; the owner must `disarm` or `retire` it first.
    fn arm(&self, fd: RawFd, interest: Interest, token: Token) -> io::Result<()>;

    /// Removes every interest and the cookie for `fd`. Undelivered results for
    /// the descriptor are discarded.
    fn disarm(&self, fd: RawFd) -> io::Result<()>;

    /// Disarms `fd` and closes it from the waiting thread after the current
    /// wait returns.
    fn retire(&self, fd: OwnedFd) -> io::Result<()>;

    /// Produces the next readiness event, draining the results of one OS
    /// call across successive invocations. `None` uses the backend's own
    /// periodic bound.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<Wait>;

    /// Interrupts a blocked `wait`.
    fn wake(&self) -> io::Result<()>;

    /// Number of descriptors with a cookie.
    fn registration_count(&self) -> usize;
}
