//! Sharded id table resolving multiplexer cookies to context entries.
//!
//! Context ids come from a counter that runs `1..=MAX_CONTEXT_ID` and wraps
//! back to 1; an id still held by a live context is skipped. The id is the
//! multiplexer cookie, so it is never zero.

use super::context::ContextEntry;
use crate::error::{Error, Result};
use crate::tracing_compat::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest context id before the counter wraps.
pub const MAX_CONTEXT_ID: u32 = 10_000_000;
const SHARDS: usize = 16;

type Shard = Mutex<HashMap<u32, Arc<ContextEntry>>>;

pub(crate) struct ContextRegistry {
    shards: Box<[Shard]>,
    next_id: AtomicU32,
    max_id: u32,
    live: AtomicUsize,
}

impl ContextRegistry {
    pub(crate) fn new() -> Self {
        Self::with_id_limit(MAX_CONTEXT_ID)
    }

    pub(crate) fn with_id_limit(max_id: u32) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU32::new(0),
            max_id: max_id.max(1),
            live: AtomicUsize::new(0),
        }
    }

    fn shard(&self, id: u32) -> &Shard {
        &self.shards[id as usize % SHARDS]
    }

    fn next_candidate(&self) -> u32 {
        let max = self.max_id;
        let prev = self
            .next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(if cur >= max { 1 } else { cur + 1 })
            })
            .unwrap_or(0);
        if prev >= max {
            1
        } else {
            prev + 1
        }
    }

    /// Assigns a fresh id to `entry`.
    pub(crate) fn register(&self, entry: Arc<ContextEntry>) -> Result<u32> {
        let live = self.live.load(Ordering::Acquire);
        if live >= self.max_id as usize {
            warn!(live, "context id space exhausted");
            return Err(Error::id_space_exhausted(live));
        }
        for _ in 0..self.max_id {
            let id = self.next_candidate();
            let mut shard = self.shard(id).lock();
            if let std::collections::hash_map::Entry::Vacant(slot) = shard.entry(id) {
                slot.insert(entry);
                self.live.fetch_add(1, Ordering::AcqRel);
                return Ok(id);
            }
        }
        let live = self.live.load(Ordering::Acquire);
        warn!(live, "context id space exhausted");
        Err(Error::id_space_exhausted(live))
    }

    pub(crate) fn resolve(&self, id: u32) -> Option<Arc<ContextEntry>> {
        self.shard(id).lock().get(&id).cloned()
    }

    /// Removes `id` if it still maps to `entry`.
    pub(crate) fn remove(&self, id: u32, entry: &Arc<ContextEntry>) -> bool {
        let mut shard = self.shard(id).lock();
        match shard.get(&id) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                shard.remove(&id);
                self.live.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Points `id` at a new entry, returning the previous one.
    pub(crate) fn replace(&self, id: u32, entry: Arc<ContextEntry>) -> Option<Arc<ContextEntry>> {
        let previous = self.shard(id).lock().insert(id, entry);
        if previous.is_none() {
            self.live.fetch_add(1, Ordering::AcqRel);
        }
        previous
    }

    pub(crate) fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("live", &self.len())
            .field("max_id", &self.max_id)
            .finish_non_exhaustive()
    }
}
