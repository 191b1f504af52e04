//! Monotonic millisecond clock.
//!
//! Timer heaps key sleeping tasks by absolute wake time in milliseconds since
//! the scheduler's own epoch (the instant the clock was created).

use std::time::{Duration, Instant};

/// Monotonic milliseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Starts a clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        duration_to_ms(self.epoch.elapsed())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturating conversion of a duration to whole milliseconds.
#[must_use]
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
