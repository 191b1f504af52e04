//! Per-task link storage for index-linked queues and heaps.
//!
//! A [`LinkTable`] plays the role of the link fields an intrusive list would
//! embed in each task: one slot per task arena slot, holding the links of
//! whichever task currently owns that slot. Every lookup checks the stored
//! [`TaskId`] generation, so links left behind by a finished task can never
//! be mistaken for links of the task that reuses its slot.

use crate::runtime::TaskId;

/// Slot-indexed link records, validated by task generation.
#[derive(Debug)]
pub struct LinkTable<L> {
    slots: Vec<Option<(TaskId, L)>>,
}

impl<L> Default for LinkTable<L> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<L: Default> LinkTable<L> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links of `id`, if it has any.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&L> {
        match self.slots.get(id.slot())? {
            Some((owner, links)) if *owner == id => Some(links),
            _ => None,
        }
    }

    /// Mutable links of `id`, if it has any.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut L> {
        match self.slots.get_mut(id.slot())? {
            Some((owner, links)) if *owner == id => Some(links),
            _ => None,
        }
    }

    /// Links of `id`, replacing anything a previous owner of the slot left.
    pub fn attach(&mut self, id: TaskId) -> &mut L {
        let slot = id.slot();
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        let entry = &mut self.slots[slot];
        if !matches!(entry, Some((owner, _)) if *owner == id) {
            *entry = Some((id, L::default()));
        }
        match entry {
            Some((_, links)) => links,
            None => unreachable!("slot populated above"),
        }
    }

    /// Drops the links of `id`.
    pub fn detach(&mut self, id: TaskId) {
        if let Some(entry) = self.slots.get_mut(id.slot()) {
            if matches!(entry, Some((owner, _)) if *owner == id) {
                *entry = None;
            }
        }
    }
}
