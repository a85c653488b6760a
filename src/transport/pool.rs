//! Bounds the number of FTP primitives in flight at once to
//! `max_concurrent_operations` (spec.md §4.2, §5), independent of how many
//! servers or threads are involved. Unlike a per-server session cache, this
//! is a pure admission-control semaphore: `suppaftp` sessions are opened and
//! torn down per call, since connections are short-lived relative to a
//! whole upload/download run and servers vary wildly in how long they keep
//! idle control connections open.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore gating concurrent transport operations.
pub struct ConnectionPool {
    state: Mutex<usize>,
    available: Condvar,
    capacity: usize,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(capacity),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a slot is free, then runs `op`, then releases the slot.
    pub fn with_slot<T>(&self, op: impl FnOnce() -> T) -> T {
        let mut free = self.state.lock();
        while *free == 0 {
            self.available.wait(&mut free);
        }
        *free -= 1;
        drop(free);

        let result = op();

        let mut free = self.state.lock();
        *free += 1;
        self.available.notify_one();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn never_exceeds_capacity() {
        let pool = Arc::new(ConnectionPool::new(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let pool = pool.clone();
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                scope.spawn(move || {
                    pool.with_slot(|| {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                });
            }
        });

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
