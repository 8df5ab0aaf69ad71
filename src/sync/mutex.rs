//! FIFO-fair mutex with direct ownership handoff.
//!
//! `unlock` never clears the "locked" flag while a waiter is present: it
//! wakes the head of the queue and hands ownership straight to it. A
//! thread that calls `lock` in the gap between that wakeup and the
//! waiter actually running still sees `locked == true` and queues behind
//! it, so lock order is exactly FIFO and a freshly arrived thread can
//! never barge ahead of one that's been waiting.

use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitNode, WaitQueue};
use crate::sys;

struct State {
    locked: bool,
    destroyed: bool,
    waiters: WaitQueue,
}

pub struct Mutex {
    inner: SpinLock<State>,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: SpinLock::new(State {
                locked: false,
                destroyed: false,
                waiters: WaitQueue::new(),
            }),
        }
    }

    pub fn lock(&self) {
        let mut state = self.inner.lock();
        assert!(!state.destroyed, "lock of a destroyed mutex");
        if !state.locked {
            state.locked = true;
            return;
        }
        let node = WaitNode::new();
        state.waiters.push_back(&node);
        drop(state);
        // Handed ownership directly by whoever wakes us; `locked` was
        // never cleared on our behalf.
        node.park();
    }

    pub fn unlock(&self) {
        let mut state = self.inner.lock();
        assert!(!state.destroyed, "unlock of a destroyed mutex");
        assert!(state.locked, "unlock of a mutex that isn't locked");
        if !state.waiters.pop_and_wake() {
            state.locked = false;
        }
    }

    /// Non-blocking acquire. Returns `true` if the lock was free and is
    /// now held by the caller.
    pub fn try_lock(&self) -> bool {
        let mut state = self.inner.lock();
        assert!(!state.destroyed, "try_lock of a destroyed mutex");
        if state.locked {
            false
        } else {
            state.locked = true;
            true
        }
    }

    /// `true` while held by anyone. Racy by construction; exists only for
    /// debug assertions in callers that already know they hold the lock.
    pub(crate) fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    /// Tears down the mutex. Blocks (spinning and yielding, like every
    /// other wait in this module) until it is unlocked with no queued
    /// waiters, then marks it destroyed; every operation above panics
    /// from that point on. Destroying an already-destroyed mutex panics
    /// immediately.
    pub fn destroy(&self) {
        loop {
            let mut state = self.inner.lock();
            assert!(!state.destroyed, "double destroy of a mutex");
            if !state.locked && state.waiters.is_empty() {
                state.destroyed = true;
                return;
            }
            drop(state);
            sys::yield_to(sys::YIELD_ANY);
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn excludes_concurrent_increments() {
        let mutex = Arc::new(Mutex::new());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    mutex.lock();
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    mutex.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 4000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Mutex::new();
        mutex.lock();
        assert!(!mutex.try_lock());
        mutex.unlock();
        assert!(mutex.try_lock());
    }

    #[test]
    #[should_panic(expected = "isn't locked")]
    fn unlock_without_lock_panics() {
        let mutex = Mutex::new();
        mutex.unlock();
    }

    #[test]
    fn destroy_on_an_unheld_mutex_is_a_no_op() {
        let mutex = Mutex::new();
        mutex.destroy();
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn double_destroy_panics() {
        let mutex = Mutex::new();
        mutex.destroy();
        mutex.destroy();
    }

    #[test]
    #[should_panic(expected = "destroyed mutex")]
    fn lock_after_destroy_panics() {
        let mutex = Mutex::new();
        mutex.destroy();
        mutex.lock();
    }
}
