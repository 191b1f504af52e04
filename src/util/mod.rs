//! Internal utilities for the scheduler.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
