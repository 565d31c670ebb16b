//! Connection table: the single strong owner of every connection.
//!
//! Everything else (timers, in-flight work items, completions) holds a
//! [`ConnHandle`], a token plus a weak reference that must be upgraded and
//! checked before use. Dropping the table entry destroys the connection as
//! soon as any temporary upgrade ends.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use mio::Token;

use crate::timer::TimerId;

/// Weak, liveness-checked reference to a connection owned by the table.
#[derive(Debug)]
pub struct ConnHandle<T> {
    token: Token,
    inner: Weak<T>,
}

impl<T> ConnHandle<T> {
    /// Returns the token the connection is registered under.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Returns a strong reference if the connection has not been released.
    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.inner.upgrade()
    }

    /// Returns true while the table still owns the connection.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Returns true if both handles refer to the same allocation.
    pub fn refers_to(&self, conn: &Arc<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(conn))
    }
}

impl<T> Clone for ConnHandle<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            inner: Weak::clone(&self.inner),
        }
    }
}

struct Slot<T> {
    conn: Arc<T>,
    timer: Option<TimerId>,
}

/// Owner map from token to connection, mutated only by the reactor thread.
pub struct ConnectionTable<T> {
    slots: HashMap<Token, Slot<T>>,
}

impl<T> ConnectionTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Takes ownership of `conn` under `token` and returns a weak handle to it.
    ///
    /// The caller links the handle into a timer and then records the timer
    /// with [`ConnectionTable::set_timer`].
    ///
    /// # Panics
    ///
    /// Panics if `token` is already in use. Tokens are never reused.
    pub fn insert(&mut self, token: Token, conn: T) -> ConnHandle<T> {
        let conn = Arc::new(conn);
        let handle = ConnHandle {
            token,
            inner: Arc::downgrade(&conn),
        };
        let previous = self.slots.insert(token, Slot { conn, timer: None });
        assert!(previous.is_none(), "token {token:?} inserted twice");
        handle
    }

    /// Records the timer that reaps the connection under `token`.
    pub fn set_timer(&mut self, token: Token, timer: TimerId) {
        if let Some(slot) = self.slots.get_mut(&token) {
            slot.timer = Some(timer);
        }
    }

    /// Returns a temporary strong reference to the connection under `token`.
    pub fn get(&self, token: Token) -> Option<Arc<T>> {
        self.slots.get(&token).map(|slot| Arc::clone(&slot.conn))
    }

    /// Returns the timer linked to the connection under `token`.
    pub fn timer(&self, token: Token) -> Option<TimerId> {
        self.slots.get(&token).and_then(|slot| slot.timer)
    }

    /// Returns a weak handle to the connection under `token`.
    pub fn handle(&self, token: Token) -> Option<ConnHandle<T>> {
        self.slots.get(&token).map(|slot| ConnHandle {
            token,
            inner: Arc::downgrade(&slot.conn),
        })
    }

    /// Drops the table's strong reference for `handle`.
    ///
    /// Only the exact connection `handle` points at is removed. Returns true
    /// if an entry was released.
    pub fn release(&mut self, handle: &ConnHandle<T>) -> bool {
        match self.slots.get(&handle.token) {
            Some(slot) if handle.refers_to(&slot.conn) => {
                self.slots.remove(&handle.token);
                true
            }
            _ => false,
        }
    }

    /// Returns the number of owned connections, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the table owns no connections.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Default for ConnectionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
