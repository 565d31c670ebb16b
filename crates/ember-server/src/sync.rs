//! Blocking synchronization shared between the reactor and the worker pool.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore built on a mutex and a condition variable.
///
/// Workers park in [`Semaphore::acquire`]; the reactor posts one permit per
/// submitted work item. [`Semaphore::release_all`] wakes every waiter at
/// shutdown without handing out work.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.lock();
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Takes a permit if one is available without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Returns one permit and wakes one waiter.
    pub fn release(&self) {
        *self.lock() += 1;
        self.available.notify_one();
    }

    /// Returns `count` permits and wakes every waiter.
    pub fn release_all(&self, count: usize) {
        *self.lock() += count;
        self.available.notify_all();
    }

    // A holder can only panic between lock and unlock on integer arithmetic,
    // so the count behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
