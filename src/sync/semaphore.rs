//! Counting semaphore, built directly on [`Mutex`] and [`Condvar`] rather
//! than its own wait queue — the host contract specifies it purely in
//! terms of those two primitives, and there's no fairness or performance
//! reason to duplicate their machinery here.

use crate::error::{Result, ThreadError};
use crate::sync::condvar::Condvar;
use crate::sync::mutex::Mutex;
use core::cell::UnsafeCell;

/// Sentinel `count` value meaning "destroyed". A live count is never
/// negative (rejected at construction and never decremented past zero),
/// so this can't collide with a real count.
const DESTROYED: i32 = -1;

pub struct Semaphore {
    mutex: Mutex,
    nonzero: Condvar,
    count: UnsafeCell<i32>,
}

unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Rejects a negative initial count.
    pub fn new(count: i32) -> Result<Self> {
        if count < 0 {
            return Err(ThreadError::InvalidArgument);
        }
        Ok(Semaphore {
            mutex: Mutex::new(),
            nonzero: Condvar::new(),
            count: UnsafeCell::new(count),
        })
    }

    pub fn wait(&self) {
        self.mutex.lock();
        assert!(unsafe { *self.count.get() } != DESTROYED, "wait on a destroyed semaphore");
        while unsafe { *self.count.get() } <= 0 {
            self.nonzero.wait(&self.mutex);
        }
        unsafe { *self.count.get() -= 1 };
        self.mutex.unlock();
    }

    pub fn signal(&self) {
        self.mutex.lock();
        assert!(unsafe { *self.count.get() } != DESTROYED, "signal of a destroyed semaphore");
        unsafe { *self.count.get() += 1 };
        // Unlock before signaling: the woken waiter reacquires `mutex`
        // immediately inside `Condvar::wait`, so signaling first would
        // just have it spin back into contention with this unlock.
        self.mutex.unlock();
        self.nonzero.signal();
    }

    /// Tears down the semaphore by marking its count destroyed. Any
    /// thread still blocked in `wait` at that point never wakes — same
    /// as the two underlying primitives, destroying a semaphore other
    /// threads are actively waiting on is a caller error, not something
    /// this library can recover from. Double destroy panics.
    pub fn destroy(&self) {
        self.mutex.lock();
        assert!(unsafe { *self.count.get() } != DESTROYED, "double destroy of a semaphore");
        unsafe { *self.count.get() = DESTROYED };
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn caps_concurrent_holders() {
        let sem = Arc::new(Semaphore::new(3).unwrap());
        let in_flight = Arc::new(std::sync::atomic::AtomicI32::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicI32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let sem = Arc::clone(&sem);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                sem.wait();
                let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                std::thread::yield_now();
                in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                sem.signal();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(std::sync::atomic::Ordering::SeqCst) <= 3);
    }

    #[test]
    fn negative_initial_count_is_rejected() {
        assert!(Semaphore::new(-1).is_err());
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn double_destroy_panics() {
        let sem = Semaphore::new(1).unwrap();
        sem.destroy();
        sem.destroy();
    }

    #[test]
    #[should_panic(expected = "destroyed semaphore")]
    fn wait_after_destroy_panics() {
        let sem = Semaphore::new(1).unwrap();
        sem.destroy();
        sem.wait();
    }
}
