//! Intrusive FIFO wait list shared by the mutex, condvar, semaphore and
//! rwlock below. A waiting thread contributes a stack-allocated
//! [`WaitNode`] and lends it to the queue by reference for exactly as
//! long as it's blocked; nothing here ever allocates.
//!
//! Every operation on a [`WaitQueue`] assumes the caller already holds
//! whatever [`super::spinlock::SpinLock`] protects the primitive this
//! queue belongs to — the queue itself does no locking. That's what makes
//! direct handoff possible: the waker can unlink the head, arm its flag
//! and wake it, all inside one critical section, with no window for a
//! third thread to interleave.

use core::cell::Cell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicI32, Ordering};

use crate::sys::{self, Ktid};

/// A thread's stack-allocated membership in a [`WaitQueue`]. The owning
/// thread parks on `flag` via `sys::deschedule_on` after enqueueing itself
/// and must not let this value move or drop while still linked.
pub struct WaitNode {
    prev: Cell<Option<NonNull<WaitNode>>>,
    next: Cell<Option<NonNull<WaitNode>>>,
    /// Zero while waiting; set to a nonzero value by whoever wakes this
    /// node, immediately before `make_runnable`.
    pub flag: AtomicI32,
    pub ktid: Ktid,
}

impl WaitNode {
    pub fn new() -> Self {
        WaitNode {
            prev: Cell::new(None),
            next: Cell::new(None),
            flag: AtomicI32::new(0),
            ktid: sys::current_ktid(),
        }
    }

    /// Blocks the calling thread until `flag` is set by a waker. Must be
    /// called with the node already unlinked from any queue (the queue
    /// only needs the node linked while deciding who wakes first).
    pub fn park(&self) {
        while self.flag.load(Ordering::Acquire) == 0 {
            sys::deschedule_on(&self.flag);
        }
    }

    fn wake(&self) {
        self.flag.store(1, Ordering::Release);
        sys::make_runnable_ktid(self.ktid);
    }
}

impl Default for WaitNode {
    fn default() -> Self {
        Self::new()
    }
}

/// An intrusive, unlocked FIFO queue of [`WaitNode`] references.
pub struct WaitQueue {
    head: Cell<Option<NonNull<WaitNode>>>,
    tail: Cell<Option<NonNull<WaitNode>>>,
    len: Cell<usize>,
}

unsafe impl Send for WaitQueue {}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            head: Cell::new(None),
            tail: Cell::new(None),
            len: Cell::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// Links `node` onto the tail of the queue. `node` must outlive its
    /// presence in the queue (it is removed by [`Self::pop_front`] or
    /// [`Self::remove`] before the caller's stack frame returns).
    pub fn push_back(&self, node: &WaitNode) {
        let ptr = NonNull::from(node);
        node.prev.set(self.tail.get());
        node.next.set(None);
        match self.tail.get() {
            Some(old_tail) => unsafe { old_tail.as_ref().next.set(Some(ptr)) },
            None => self.head.set(Some(ptr)),
        }
        self.tail.set(Some(ptr));
        self.len.set(self.len.get() + 1);
    }

    /// Unlinks and wakes the longest-waiting node, handing it off
    /// directly rather than leaving it to compete for the outer lock.
    pub fn pop_and_wake(&self) -> bool {
        match self.head.get() {
            Some(ptr) => {
                self.unlink(ptr);
                unsafe { ptr.as_ref().wake() };
                true
            }
            None => false,
        }
    }

    /// Removes `node` from the queue without waking it (used by condvar's
    /// reject path when a waiter gives up before being signaled, and by
    /// rwlock's re-admit bookkeeping).
    pub fn remove(&self, node: &WaitNode) {
        self.unlink(NonNull::from(node));
    }

    fn unlink(&self, ptr: NonNull<WaitNode>) {
        let node = unsafe { ptr.as_ref() };
        match node.prev.get() {
            Some(prev) => unsafe { prev.as_ref().next.set(node.next.get()) },
            None => self.head.set(node.next.get()),
        }
        match node.next.get() {
            Some(next) => unsafe { next.as_ref().prev.set(node.prev.get()) },
            None => self.tail.set(node.prev.get()),
        }
        node.prev.set(None);
        node.next.set(None);
        self.len.set(self.len.get() - 1);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
