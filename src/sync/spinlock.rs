//! Bounded spinlock: the one primitive every FIFO-fair lock in [`super`] is
//! built on, and the only lock in the library that is never itself queued
//! on the kernel. A thread that can't get it busy-waits for a short, fixed
//! number of iterations, then calls `yield` once and resets the counter.
//! There's no upper bound on total wait time, only on how long a single
//! spin burst is allowed to run before giving the scheduler a turn.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI32, Ordering};

use crate::sys;

/// Free-word value. Chosen so the raw backend's stack-less exit tail can
/// release the TCB table's spinlock with a single unconditional store of
/// `1`, without reading the prior value.
const UNLOCKED: i32 = 1;
const LOCKED: i32 = 0;

/// Spin iterations attempted before yielding the processor.
const SPIN_LIMIT: u32 = 64;

/// A spinlock that yields after a bounded number of failed attempts,
/// rather than spinning forever. Safe to use from code that must not
/// allocate or touch the kernel's blocking primitives (the stack-arena and
/// TCB-table bookkeeping below a thread's own creation/exit path).
pub struct SpinLock<T> {
    word: AtomicI32,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            word: AtomicI32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            let mut spins = 0;
            loop {
                if self
                    .word
                    .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return SpinLockGuard { lock: self };
                }
                spins += 1;
                if spins >= SPIN_LIMIT {
                    break;
                }
                core::hint::spin_loop();
            }
            sys::yield_to(sys::YIELD_ANY);
        }
    }

    /// Raw pointer to the lock word, for the stack-less exit tail, which
    /// must release this lock without a normal function call.
    pub(crate) fn word_ptr(&self) -> *mut i32 {
        self.word.as_ptr()
    }

    /// Runs `f` while holding the lock, then hands back its result and
    /// the raw lock word *without releasing it* — the lock stays held
    /// until whoever receives the pointer stores `UNLOCKED` into it
    /// directly. Used only by the exit path, which must keep a thread's
    /// stack-arena slot unreusable until its teardown has gone far enough
    /// that a concurrent `thr_create` landing on the same slot is safe.
    pub(crate) fn lock_then_leak<R>(&self, f: impl FnOnce(&mut T) -> R) -> (R, *mut i32) {
        let mut guard = self.lock();
        let result = f(&mut guard);
        let ptr = self.word_ptr();
        core::mem::forget(guard);
        (result, ptr)
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.word.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::vec::Vec;

    #[test]
    fn mutual_exclusion_under_contention() {
        let counter = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }
}
