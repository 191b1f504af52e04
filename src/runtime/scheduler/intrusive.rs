//! Index-linked FIFO ring for worker ready queues.
//!
//! [`IntrusiveRing`] is a doubly-linked list threaded through a
//! [`LinkTable`] keyed by task slot rather than through heap-allocated
//! nodes. The ring itself stores only head/tail ids.
//!
//! # Design
//!
//! - Links (`next`, `prev`, `queued`) live in the ring's link table
//! - Each task is in the ring at most once (enforced by `queued`)
//! - O(1) push_back, pop_front, remove, and contains
//! - Links are cleared on removal, so a popped task can be re-queued
//!
//! Workers hold one ring each, behind the queue mutex.

use super::links::LinkTable;
use crate::runtime::TaskId;

#[derive(Debug, Default, Clone, Copy)]
struct QueueLinks {
    next: Option<TaskId>,
    prev: Option<TaskId>,
    queued: bool,
}

/// An index-linked doubly-linked FIFO of task ids.
///
/// # Invariants
///
/// - If `head.is_none()`, then `tail.is_none()` and `len == 0`
/// - If `head.is_some()`, then `tail.is_some()` and `len > 0`
/// - Every task in the ring has `queued == true` in the link table
/// - The list forms a proper doubly-linked chain from head to tail
#[derive(Debug, Default)]
pub struct IntrusiveRing {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    len: usize,
    links: LinkTable<QueueLinks>,
}

impl IntrusiveRing {
    /// Creates a new empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks in the ring.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the ring is empty.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes a task to the back of the ring.
    ///
    /// Returns `false` (and leaves the ring unchanged) if the task is already
    /// queued.
    pub fn push_back(&mut self, task_id: TaskId) -> bool {
        let links = self.links.attach(task_id);
        if links.queued {
            return false;
        }
        *links = QueueLinks {
            next: None,
            prev: self.tail,
            queued: true,
        };

        match self.tail {
            None => self.head = Some(task_id),
            Some(old_tail) => {
                if let Some(tail_links) = self.links.get_mut(old_tail) {
                    tail_links.next = Some(task_id);
                }
            }
        }
        self.tail = Some(task_id);
        self.len += 1;
        true
    }

    /// Pops the task at the front of the ring.
    #[must_use]
    pub fn pop_front(&mut self) -> Option<TaskId> {
        let head = self.head?;
        self.remove(head).then_some(head)
    }

    /// Removes a specific task from the ring.
    ///
    /// Returns `true` if the task was found and removed.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        let Some(links) = self.links.get(task_id).copied() else {
            return false;
        };
        if !links.queued {
            return false;
        }
        self.links.detach(task_id);

        match links.prev {
            None => self.head = links.next,
            Some(prev) => {
                if let Some(prev_links) = self.links.get_mut(prev) {
                    prev_links.next = links.next;
                }
            }
        }
        match links.next {
            None => self.tail = links.prev,
            Some(next) => {
                if let Some(next_links) = self.links.get_mut(next) {
                    next_links.prev = links.prev;
                }
            }
        }

        self.len -= 1;
        true
    }

    /// Returns true if the given task is in the ring.
    #[must_use]
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.links.get(task_id).is_some_and(|links| links.queued)
    }

    /// Returns the head task id without removing it.
    #[must_use]
    #[inline]
    pub const fn peek_front(&self) -> Option<TaskId> {
        self.head
    }

    /// Empties the ring, returning its tasks in FIFO order.
    pub fn drain(&mut self) -> Vec<TaskId> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(id) = self.pop_front() {
            out.push(id);
        }
        out
    }
}
