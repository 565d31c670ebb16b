//! The hand-off between the reactor and the worker threads.
//!
//! Items live in a fixed-capacity `ArrayQueue`; a [`Semaphore`] counts them
//! so idle workers park instead of spinning. The reactor never blocks on a
//! full queue: the item comes back as [`Rejected`] together with the queue
//! depth it was turned away at.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::sync::Semaphore;

/// A work item the queue had no room for.
#[derive(Debug, PartialEq, Eq)]
pub struct Rejected<T> {
    pub item: T,
    /// Items waiting when the post was refused.
    pub pending: usize,
}

/// Bounded multi-consumer queue with blocking takes and non-blocking posts.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: ArrayQueue<T>,
    ready: Semaphore,
    closed: AtomicBool,
}

impl<T> WorkQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            items: ArrayQueue::new(capacity),
            ready: Semaphore::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues an item and wakes one parked worker.
    pub fn post(&self, item: T) -> Result<(), Rejected<T>> {
        match self.items.push(item) {
            Ok(()) => {
                self.ready.release();
                Ok(())
            }
            Err(item) => Err(Rejected {
                item,
                pending: self.items.len(),
            }),
        }
    }

    /// Blocks until an item is available. Returns `None` once the queue has
    /// been closed, even if items are still waiting.
    pub fn take(&self) -> Option<T> {
        loop {
            self.ready.acquire();
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = self.items.pop() {
                return Some(item);
            }
        }
    }

    /// Takes an item without blocking.
    pub fn try_take(&self) -> Option<T> {
        if self.closed.load(Ordering::Acquire) || !self.ready.try_acquire() {
            return None;
        }
        self.items.pop()
    }

    /// Makes every current and future `take` return `None`, waking
    /// `waiters` parked takers.
    pub fn close(&self, waiters: usize) {
        self.closed.store(true, Ordering::Release);
        self.ready.release_all(waiters);
    }

    /// Accepts takers again after [`WorkQueue::close`].
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}
