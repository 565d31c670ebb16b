//! Expiry-ordered timer queue that reaps idle and closed connections.
//!
//! A binary min-heap keyed by absolute expiry. Each timer holds a weak
//! [`ConnHandle`] and a tombstone flag. Reaping is two-phase:
//!
//! 1. An expired live timer is *evicted*: tombstoned and pushed forward by
//!    one grace window. The reactor deregisters the socket.
//! 2. An expired tombstoned timer is *released*: popped for good. The
//!    reactor drops the table's strong reference.
//!
//! Between the two phases the connection is closed but still inspectable
//! through its handle, so a late completion or log line never touches freed
//! state.
//!
//! Every operation takes `now` explicitly; tests drive time by hand.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::table::ConnHandle;

/// Identifier of a timer inside a [`TimerQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Work produced by [`TimerQueue::tick`] for the reactor to carry out.
#[derive(Debug)]
pub enum Expired<T> {
    /// Idle connection: deregister and close its socket. The timer has been
    /// tombstoned and rescheduled by one grace window.
    Evict(ConnHandle<T>),
    /// Tombstoned connection past its grace window: drop the strong
    /// reference. The timer has left the queue.
    Release(ConnHandle<T>),
}

#[derive(Debug)]
struct Timer<T> {
    id: TimerId,
    expires: Instant,
    tombstoned: bool,
    conn: ConnHandle<T>,
}

/// Min-heap of connection timers, owned and driven by the reactor thread.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: Vec<Timer<T>>,
    /// Heap index of every queued timer.
    positions: HashMap<TimerId, usize>,
    next_id: u64,
    grace: Duration,
}

impl<T> TimerQueue<T> {
    /// Creates an empty queue whose tombstoned timers wait `grace` before
    /// release.
    pub fn new(grace: Duration) -> Self {
        Self {
            heap: Vec::new(),
            positions: HashMap::new(),
            next_id: 0,
            grace,
        }
    }

    /// Queues a timer for `conn` that expires `window` after `now`.
    pub fn add(&mut self, conn: ConnHandle<T>, now: Instant, window: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let index = self.heap.len();
        self.heap.push(Timer {
            id,
            expires: now + window,
            tombstoned: false,
            conn,
        });
        self.positions.insert(id, index);
        self.sift_up(index);
        id
    }

    /// Pushes a live timer's expiry to `window` after `now`.
    ///
    /// Tombstoned timers keep their grace deadline. Returns false if the
    /// timer is tombstoned or gone.
    pub fn extend(&mut self, id: TimerId, now: Instant, window: Duration) -> bool {
        let Some(&index) = self.positions.get(&id) else {
            return false;
        };
        if self.heap[index].tombstoned {
            return false;
        }
        self.heap[index].expires = now + window;
        self.reposition(index);
        true
    }

    /// Marks a timer's connection as closed and starts its grace window.
    ///
    /// Returns false if the timer was already tombstoned or is gone.
    pub fn tombstone(&mut self, id: TimerId, now: Instant) -> bool {
        let Some(&index) = self.positions.get(&id) else {
            return false;
        };
        let timer = &mut self.heap[index];
        if timer.tombstoned {
            return false;
        }
        timer.tombstoned = true;
        timer.expires = now + self.grace;
        self.reposition(index);
        true
    }

    /// Processes every timer expired at `now`, root first.
    ///
    /// Stops at the first unexpired root; heap order guarantees nothing
    /// behind it has expired.
    pub fn tick(&mut self, now: Instant) -> Vec<Expired<T>> {
        let mut expired = Vec::new();

        while let Some(root) = self.heap.first() {
            if root.expires > now {
                break;
            }

            if root.tombstoned {
                let timer = self.pop_root();
                expired.push(Expired::Release(timer.conn));
            } else if !root.conn.is_live() {
                // Released out of band; nothing left to close.
                self.pop_root();
            } else {
                let grace = self.grace;
                let root = &mut self.heap[0];
                root.tombstoned = true;
                root.expires = now + grace;
                let conn = root.conn.clone();
                self.sift_down(0);
                expired.push(Expired::Evict(conn));
            }
        }

        expired
    }

    /// Returns the earliest expiry in the queue.
    pub fn peek_expiry(&self) -> Option<Instant> {
        self.heap.first().map(|timer| timer.expires)
    }

    /// Returns whether the timer is tombstoned, or `None` if it is gone.
    pub fn is_tombstoned(&self, id: TimerId) -> Option<bool> {
        self.positions
            .get(&id)
            .map(|&index| self.heap[index].tombstoned)
    }

    /// Returns the number of queued timers, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no timers are queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn pop_root(&mut self) -> Timer<T> {
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let timer = self
            .heap
            .pop()
            .unwrap_or_else(|| unreachable!("pop_root on an empty heap"));
        self.positions.remove(&timer.id);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        timer
    }

    fn reposition(&mut self, index: usize) {
        let index = self.sift_up(index);
        self.sift_down(index);
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[parent].expires <= self.heap[index].expires {
                break;
            }
            self.swap(parent, index);
            index = parent;
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.heap[right].expires < self.heap[left].expires {
                right
            } else {
                left
            };
            if self.heap[index].expires <= self.heap[child].expires {
                break;
            }
            self.swap(index, child);
            index = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].id, a);
        self.positions.insert(self.heap[b].id, b);
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.heap.len(), self.positions.len());
        for (index, timer) in self.heap.iter().enumerate() {
            assert_eq!(self.positions[&timer.id], index);
            if index > 0 {
                let parent = &self.heap[(index - 1) / 2];
                assert!(parent.expires <= timer.expires, "heap order violated at {index}");
            }
        }
    }
}
