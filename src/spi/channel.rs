//! Notification channel — callback thread → host pump.
//!
//! A `ConcurrentQueue` for the events plus a coalesced wakeup. Any number of
//! `publish` calls before the pump runs collapse into a single wakeup, so the
//! consumer must drain until the queue is empty every time it wakes.
//!
//! `publish` holds the close gate shared while it pushes and `close` holds it
//! exclusively while it clears, so nothing is left queued after a close.

use crate::queue::ConcurrentQueue;
use crate::types::notification::Notification;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::debug;

pub struct NotificationChannel {
    queue: ConcurrentQueue<Notification>,
    wakeup: Notify,
    closed: RwLock<bool>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self {
            queue: ConcurrentQueue::new(),
            wakeup: Notify::new(),
            closed: RwLock::new(false),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Producer side: enqueue, then signal. Never blocks on the consumer.
    /// Events published after `close` are dropped.
    pub fn publish(&self, notification: Notification) {
        {
            let closed = self.closed.read();
            if *closed {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %notification.kind, "Channel closed, dropping notification");
                return;
            }
            self.queue.push(notification);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
    }

    /// Consumer side: resolves once at least one `publish` (or `close`) has
    /// happened since the last wakeup was consumed.
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    /// Pop until empty, handing every notification to `f` in FIFO order.
    /// Returns how many were handed over.
    pub fn drain<F>(&self, mut f: F) -> usize
    where
        F: FnMut(Notification),
    {
        let mut count = 0;
        while let Some(notification) = self.queue.try_pop() {
            f(notification);
            count += 1;
        }
        count
    }

    /// Stop accepting events and discard anything not yet drained.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut closed = self.closed.write();
            *closed = true;
            self.queue.clear()
        };
        self.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
        self.wakeup.notify_one();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new()
    }
}
