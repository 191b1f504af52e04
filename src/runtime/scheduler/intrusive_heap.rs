//! Per-worker timer min-heap of sleeping tasks.
//!
//! [`TimerHeap`] is a binary min-heap keyed by absolute wake time
//! (milliseconds on the scheduler clock). The backbone is a compact
//! `Vec<TaskId>`; each task's heap position, wake time, and insertion
//! generation live in a [`LinkTable`], which gives O(1) membership tests and
//! O(log n) removal by id.
//!
//! # Ordering
//!
//! Earliest wake time first. Equal wake times pop in insertion order.
//!
//! # Complexity
//!
//! | Operation | Time       |
//! |-----------|------------|
//! | push      | O(log n)   |
//! | pop       | O(log n)   |
//! | remove    | O(log n)   |
//! | peek      | O(1)       |
//! | contains  | O(1)       |

use super::links::LinkTable;
use crate::runtime::TaskId;

#[derive(Debug, Default, Clone, Copy)]
struct HeapLinks {
    heap_index: Option<u32>,
    wake_at: u64,
    generation: u64,
}

/// Binary min-heap of task ids ordered by wake time.
///
/// # Invariants
///
/// - For every entry at position `i`: `links[heap[i]].heap_index == Some(i)`
/// - For every entry at position `i` with parent `p = (i-1)/2`:
///   `key(heap[p]) <= key(heap[i])` where `key = (wake_at, generation)`
/// - Tasks not in the heap have no links
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: Vec<TaskId>,
    links: LinkTable<HeapLinks>,
    next_generation: u64,
}

impl TimerHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sleeping tasks.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no task is sleeping.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the earliest task and its wake time.
    #[must_use]
    pub fn peek(&self) -> Option<(TaskId, u64)> {
        let id = *self.heap.first()?;
        Some((id, self.wake_at(id)))
    }

    /// Returns the earliest wake time.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<u64> {
        self.peek().map(|(_, wake_at)| wake_at)
    }

    /// Returns true if the task is sleeping in this heap.
    #[must_use]
    pub fn contains(&self, task: TaskId) -> bool {
        self.links
            .get(task)
            .is_some_and(|links| links.heap_index.is_some())
    }

    /// Inserts a task to wake at `wake_at`.
    ///
    /// Returns `false` if the task is already in the heap.
    pub fn push(&mut self, task: TaskId, wake_at: u64) -> bool {
        if self.contains(task) {
            return false;
        }
        let generation = self.next_generation;
        self.next_generation += 1;

        let pos = self.heap.len();
        *self.links.attach(task) = HeapLinks {
            heap_index: Some(pos as u32),
            wake_at,
            generation,
        };
        self.heap.push(task);
        self.sift_up(pos);
        true
    }

    /// Removes and returns the earliest task.
    #[must_use]
    pub fn pop(&mut self) -> Option<TaskId> {
        let task = *self.heap.first()?;
        self.remove_at(0);
        Some(task)
    }

    /// Pops the earliest task if its wake time is at or before `now`.
    #[must_use]
    pub fn pop_due(&mut self, now: u64) -> Option<TaskId> {
        match self.peek_deadline() {
            Some(wake_at) if wake_at <= now => self.pop(),
            _ => None,
        }
    }

    /// Removes a specific task from the heap.
    ///
    /// Returns `true` if the task was found and removed.
    pub fn remove(&mut self, task: TaskId) -> bool {
        let Some(pos) = self.links.get(task).and_then(|links| links.heap_index) else {
            return false;
        };
        self.remove_at(pos as usize);
        true
    }

    /// Empties the heap, returning the tasks in wake order.
    pub fn drain(&mut self) -> Vec<TaskId> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(id) = self.pop() {
            out.push(id);
        }
        out
    }

    fn wake_at(&self, task: TaskId) -> u64 {
        self.links.get(task).map_or(u64::MAX, |links| links.wake_at)
    }

    fn remove_at(&mut self, pos: usize) {
        let last = self.heap.len() - 1;
        let removed = self.heap[pos];
        self.links.detach(removed);

        if pos == last {
            self.heap.pop();
            return;
        }

        self.heap.swap(pos, last);
        self.heap.pop();
        self.set_index(pos);

        // The moved element may belong above or below its new position.
        let new_pos = self.sift_up(pos);
        if new_pos == pos {
            self.sift_down(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.earlier(pos, parent) {
                self.swap_positions(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = 2 * pos + 2;
            let mut smallest = pos;

            if left < len && self.earlier(left, smallest) {
                smallest = left;
            }
            if right < len && self.earlier(right, smallest) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap_positions(pos, smallest);
            pos = smallest;
        }
    }

    /// Returns `true` if the entry at `a` wakes strictly before the entry at `b`.
    fn earlier(&self, a: usize, b: usize) -> bool {
        let key = |pos: usize| {
            self.links
                .get(self.heap[pos])
                .map_or((u64::MAX, u64::MAX), |l| (l.wake_at, l.generation))
        };
        key(a) < key(b)
    }

    fn swap_positions(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.set_index(a);
        self.set_index(b);
    }

    fn set_index(&mut self, pos: usize) {
        if let Some(links) = self.links.get_mut(self.heap[pos]) {
            links.heap_index = Some(pos as u32);
        }
    }
}
