//! Writer-favoring reader/writer lock.
//!
//! A new reader can join a lock already held for reading as long as no
//! writer is currently queued (`lock_state > 0 && writer_waiting == 0`);
//! once a writer is waiting, every later arrival — reader or writer —
//! queues behind it, so a steady stream of readers can't starve a writer
//! indefinitely. `unlock` always prefers waking a queued writer over the
//! waiting readers; only when no writer is queued does it release every
//! waiting reader at once.

use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitNode, WaitQueue};
use crate::sys;

/// `> 0`: held by that many readers. `-1`: held by a writer. `0`: free.
/// `-2`: destroyed.
struct State {
    lock_state: i32,
    writer_waiting: i32,
    readers: WaitQueue,
    writers: WaitQueue,
}

const DESTROYED: i32 = -2;

pub struct RwLock {
    inner: SpinLock<State>,
}

impl RwLock {
    pub const fn new() -> Self {
        RwLock {
            inner: SpinLock::new(State {
                lock_state: 0,
                writer_waiting: 0,
                readers: WaitQueue::new(),
                writers: WaitQueue::new(),
            }),
        }
    }

    pub fn lock_read(&self) {
        let mut state = self.inner.lock();
        assert_ne!(state.lock_state, DESTROYED, "lock_read of a destroyed rwlock");
        if state.lock_state >= 0 && state.writer_waiting == 0 {
            state.lock_state += 1;
            return;
        }
        let node = WaitNode::new();
        state.readers.push_back(&node);
        drop(state);
        node.park();
        // Woken with lock_state already incremented on our behalf.
    }

    pub fn lock_write(&self) {
        let mut state = self.inner.lock();
        assert_ne!(state.lock_state, DESTROYED, "lock_write of a destroyed rwlock");
        if state.lock_state == 0 {
            state.lock_state = -1;
            return;
        }
        state.writer_waiting += 1;
        let node = WaitNode::new();
        state.writers.push_back(&node);
        drop(state);
        node.park();
        // Woken with writer_waiting already decremented and lock_state
        // already set to -1 on our behalf.
    }

    pub fn unlock(&self) {
        let mut state = self.inner.lock();
        assert_ne!(state.lock_state, DESTROYED, "unlock of a destroyed rwlock");
        if state.lock_state == -1 {
            state.lock_state = 0;
        } else {
            state.lock_state -= 1;
        }
        self.admit_waiters(&mut state);
    }

    /// Converts the caller's write hold into a read hold without ever
    /// releasing the lock to another writer in between.
    pub fn downgrade(&self) {
        let mut state = self.inner.lock();
        assert_eq!(state.lock_state, -1, "downgrade of a rwlock not held for writing");
        state.lock_state = 1;
        self.admit_waiters(&mut state);
    }

    /// Tears down the rwlock. Legal only while free with no queued
    /// waiters; spins and yields until that holds, then marks it
    /// destroyed. Double destroy panics.
    pub fn destroy(&self) {
        loop {
            let mut state = self.inner.lock();
            assert_ne!(state.lock_state, DESTROYED, "double destroy of a rwlock");
            if state.lock_state == 0 && state.readers.is_empty() && state.writers.is_empty() {
                state.lock_state = DESTROYED;
                return;
            }
            drop(state);
            sys::yield_to(sys::YIELD_ANY);
        }
    }

    fn admit_waiters(&self, state: &mut State) {
        if state.lock_state != 0 {
            // Still held (by readers after a reader unlock, or just
            // converted by downgrade); only extra readers may join, and
            // only if no writer is ahead of them.
            if state.writer_waiting == 0 {
                while state.readers.pop_and_wake() {
                    state.lock_state += 1;
                }
            }
            return;
        }
        if state.writer_waiting > 0 {
            state.writer_waiting -= 1;
            state.lock_state = -1;
            let woke = state.writers.pop_and_wake();
            debug_assert!(woke);
        } else {
            while state.readers.pop_and_wake() {
                state.lock_state += 1;
            }
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn readers_run_concurrently() {
        let lock = Arc::new(RwLock::new());
        let active = Arc::new(std::sync::atomic::AtomicI32::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicI32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                lock.lock_read();
                let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                lock.unlock();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(std::sync::atomic::Ordering::SeqCst) > 1);
    }

    #[test]
    fn writer_excludes_everyone() {
        let lock = Arc::new(RwLock::new());
        let active = Arc::new(std::sync::atomic::AtomicI32::new(0));
        let violations = Arc::new(std::sync::atomic::AtomicI32::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let lock = Arc::clone(&lock);
            let active = Arc::clone(&active);
            let violations = Arc::clone(&violations);
            handles.push(std::thread::spawn(move || {
                if i % 2 == 0 {
                    lock.lock_write();
                    let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    if now != 1 {
                        violations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    lock.unlock();
                } else {
                    lock.lock_read();
                    active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    lock.unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(violations.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn downgrade_lets_caller_keep_a_read_hold() {
        let lock = RwLock::new();
        lock.lock_write();
        lock.downgrade();
        // A second reader must now be able to join without blocking.
        lock.lock_read();
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn destroy_on_a_free_lock_is_a_no_op() {
        let lock = RwLock::new();
        lock.destroy();
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn double_destroy_panics() {
        let lock = RwLock::new();
        lock.destroy();
        lock.destroy();
    }

    #[test]
    #[should_panic(expected = "destroyed rwlock")]
    fn lock_read_after_destroy_panics() {
        let lock = RwLock::new();
        lock.destroy();
        lock.lock_read();
    }
}
