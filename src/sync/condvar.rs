//! Condition variable with no lost-wakeup window.
//!
//! `wait` links a [`WaitNode`] into the condvar's own queue *before*
//! releasing the caller's mutex, so a `signal`/`broadcast` that runs
//! between the unlock and the eventual `deschedule` still finds (and
//! wakes) the node — `WaitNode::park` re-checks its flag before ever
//! calling into the kernel, so an early wakeup is never lost, only
//! short-circuited.

use crate::sync::mutex::Mutex;
use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitNode, WaitQueue};
use crate::sys;

struct State {
    destroyed: bool,
    queue: WaitQueue,
}

pub struct Condvar {
    inner: SpinLock<State>,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar {
            inner: SpinLock::new(State {
                destroyed: false,
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Atomically releases `mutex` and blocks the caller until woken by
    /// `signal` or `broadcast`, then reacquires `mutex` before returning.
    /// `mutex` must be held by the caller on entry.
    pub fn wait(&self, mutex: &Mutex) {
        let node = WaitNode::new();
        {
            let state = self.inner.lock();
            assert!(!state.destroyed, "wait on a destroyed condvar");
            state.queue.push_back(&node);
        }
        mutex.unlock();
        node.park();
        mutex.lock();
    }

    pub fn signal(&self) {
        let state = self.inner.lock();
        assert!(!state.destroyed, "signal of a destroyed condvar");
        state.queue.pop_and_wake();
    }

    pub fn broadcast(&self) {
        let state = self.inner.lock();
        assert!(!state.destroyed, "broadcast of a destroyed condvar");
        while state.queue.pop_and_wake() {}
    }

    /// Tears down the condvar. A no-op identity when there are no waiters
    /// queued; otherwise spins and yields until the queue drains (from
    /// ongoing `signal`/`broadcast` calls elsewhere) before marking it
    /// destroyed. Destroying an already-destroyed condvar panics.
    pub fn destroy(&self) {
        loop {
            let mut state = self.inner.lock();
            assert!(!state.destroyed, "double destroy of a condvar");
            if state.queue.is_empty() {
                state.destroyed = true;
                return;
            }
            drop(state);
            sys::yield_to(sys::YIELD_ANY);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_wakes_a_single_waiter() {
        let mutex = Arc::new(Mutex::new());
        let cv = Arc::new(Condvar::new());
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (m2, c2, r2) = (Arc::clone(&mutex), Arc::clone(&cv), Arc::clone(&ready));
        let waiter = std::thread::spawn(move || {
            m2.lock();
            while !r2.load(std::sync::atomic::Ordering::Acquire) {
                c2.wait(&m2);
            }
            m2.unlock();
        });

        // Give the waiter a chance to actually block before signaling;
        // not required for correctness (signal before wait is legal, the
        // waiter would simply re-check the predicate and return), only to
        // exercise the blocking path in this test.
        std::thread::yield_now();
        mutex.lock();
        ready.store(true, std::sync::atomic::Ordering::Release);
        mutex.unlock();
        cv.signal();

        waiter.join().unwrap();
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        let mutex = Arc::new(Mutex::new());
        let cv = Arc::new(Condvar::new());
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let woken = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let (m, c, r, w) = (
                Arc::clone(&mutex),
                Arc::clone(&cv),
                Arc::clone(&ready),
                Arc::clone(&woken),
            );
            handles.push(std::thread::spawn(move || {
                m.lock();
                while !r.load(std::sync::atomic::Ordering::Acquire) {
                    c.wait(&m);
                }
                w.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                m.unlock();
            }));
        }

        std::thread::sleep(std::time::Duration::from_millis(20));
        mutex.lock();
        ready.store(true, std::sync::atomic::Ordering::Release);
        mutex.unlock();
        cv.broadcast();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(woken.load(std::sync::atomic::Ordering::Relaxed), 6);
    }

    #[test]
    fn destroy_with_no_waiters_is_a_no_op() {
        let cv = Condvar::new();
        cv.destroy();
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn double_destroy_panics() {
        let cv = Condvar::new();
        cv.destroy();
        cv.destroy();
    }

    #[test]
    #[should_panic(expected = "destroyed condvar")]
    fn signal_after_destroy_panics() {
        let cv = Condvar::new();
        cv.destroy();
        cv.signal();
    }
}
