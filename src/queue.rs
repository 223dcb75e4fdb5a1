//! Thread-safe FIFO used for every cross-thread handoff.
//!
//! Producers never block. Consumers either block in [`ConcurrentQueue::pop`]
//! (the worker thread) or poll with [`ConcurrentQueue::try_pop`] (the host
//! pump, which must never block).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

pub struct ConcurrentQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> ConcurrentQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item and wake one blocked `pop`.
    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock();
            items.push_back(item);
        }
        self.available.notify_one();
    }

    /// Block until an item is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Best-effort snapshot; may be stale by the time the caller reads it.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop everything still queued, returning how many items were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
