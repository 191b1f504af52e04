//! Event bits delivered to tasks.
//!
//! A task's mailbox is a single `u32`. Producers OR bits in with
//! [`TaskHandle::signal`](super::TaskHandle::signal); the worker takes every
//! bit except [`EventFlags::ALIVE`] just before calling `run`.
//!
//! | Bit | Flag | Meaning |
//! |-----|------|---------|
//! | 0 | `KILL` | Owner asks the task to finish |
//! | 1 | `IDLE` | The task's sleep on the timer heap elapsed |
//! | 2 | `START` | First activation |
//! | 3 | `TIMEOUT` | A protocol-level timeout fired |
//! | 4 | `READ` | Descriptor readiness (default dispatch) |
//! | 5 | `WRITE` | Write readiness (custom handlers only) |
//! | 6 | `UPDATE` | Application-defined refresh |
//! | 31 | `ALIVE` | Reserved: scheduled, sleeping, or running |

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// A set of task event bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u32);

impl EventFlags {
    /// No events.
    pub const NONE: Self = Self(0);
    /// Cancellation request; `run` is expected to return `Step::Finish`.
    pub const KILL: Self = Self(1 << 0);
    /// Set by the worker when a task goes to sleep on the timer heap.
    pub const IDLE: Self = Self(1 << 1);
    /// First activation of a task.
    pub const START: Self = Self(1 << 2);
    /// A protocol-level timeout fired.
    pub const TIMEOUT: Self = Self(1 << 3);
    /// The bound descriptor is readable.
    pub const READ: Self = Self(1 << 4);
    /// The bound descriptor is writable.
    pub const WRITE: Self = Self(1 << 5);
    /// Application-defined refresh.
    pub const UPDATE: Self = Self(1 << 6);
    /// Reserved mailbox bit. Never observed by `run`.
    pub const ALIVE: Self = Self(1 << 31);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::KILL, "KILL"),
        (Self::IDLE, "IDLE"),
        (Self::START, "START"),
        (Self::TIMEOUT, "TIMEOUT"),
        (Self::READ, "READ"),
        (Self::WRITE, "WRITE"),
        (Self::UPDATE, "UPDATE"),
        (Self::ALIVE, "ALIVE"),
    ];

    /// Builds flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns these flags without `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for EventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EventFlags(NONE)");
        }
        f.write_str("EventFlags(")?;
        let mut rest = *self;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if rest.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                rest = rest.without(flag);
                first = false;
            }
        }
        if !rest.is_empty() {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{:#x}", rest.0)?;
        }
        f.write_str(")")
    }
}
