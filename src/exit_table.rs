//! Exit-status table: where `thr_exit` deposits a status for `thr_join`
//! to collect.
//!
//! Keyed by the library's own user-visible tid rather than the TCB slot
//! index, because a slot is recycled the moment its stack is retired but
//! a tid must remain joinable (or report `AlreadyReaped`) until exactly
//! one `thr_join` call has collected it.

use alloc::sync::Arc;

use crate::error::{Result, ThreadError};
use crate::hashtable::HashTable;
use crate::sync::{Condvar, Mutex};

enum Status {
    Running,
    Exited(i32),
    Reaped,
}

struct Slot {
    mutex: Mutex,
    exited: Condvar,
    status: core::cell::UnsafeCell<Status>,
    joiner_waiting: core::cell::UnsafeCell<bool>,
}

unsafe impl Sync for Slot {}

pub struct ExitTable {
    slots: HashTable<i32, Arc<Slot>>,
}

impl ExitTable {
    pub fn new(expected_threads: usize) -> Self {
        ExitTable {
            slots: HashTable::with_buckets(expected_threads.next_power_of_two().max(16)),
        }
    }

    /// Registers `tid` as running. Must be called once, by the parent,
    /// before the new thread can possibly call `mark_exited`.
    pub fn register(&self, tid: i32) {
        self.slots.insert(
            tid,
            Arc::new(Slot {
                mutex: Mutex::new(),
                exited: Condvar::new(),
                status: core::cell::UnsafeCell::new(Status::Running),
                joiner_waiting: core::cell::UnsafeCell::new(false),
            }),
        );
    }

    /// Removes a registration that will never be posted to, because the
    /// thread never actually started (the kernel spawn primitive itself
    /// failed). Any `join` on `tid` after this returns `InvalidArgument`
    /// rather than blocking forever.
    pub fn forget(&self, tid: i32) {
        self.slots.remove(&tid);
    }

    /// Deposits `status` for `tid` and wakes a joiner if one is waiting.
    pub fn mark_exited(&self, tid: i32, status: i32) {
        let Some(slot) = self.slots.get_cloned(&tid) else {
            return;
        };
        slot.mutex.lock();
        unsafe {
            *slot.status.get() = Status::Exited(status);
        }
        slot.exited.broadcast();
        slot.mutex.unlock();
    }

    /// Blocks until `tid` exits, then reaps its status. A second call for
    /// the same `tid` (concurrent or subsequent) fails rather than
    /// blocking forever on a slot nobody will ever post to again.
    pub fn join(&self, tid: i32) -> Result<i32> {
        let Some(slot) = self.slots.get_cloned(&tid) else {
            return Err(ThreadError::InvalidArgument);
        };
        slot.mutex.lock();
        if unsafe { *slot.joiner_waiting.get() } {
            slot.mutex.unlock();
            return Err(ThreadError::AlreadyJoined);
        }
        if matches!(unsafe { &*slot.status.get() }, Status::Reaped) {
            slot.mutex.unlock();
            return Err(ThreadError::AlreadyReaped);
        }
        unsafe {
            *slot.joiner_waiting.get() = true;
        }
        while matches!(unsafe { &*slot.status.get() }, Status::Running) {
            slot.exited.wait(&slot.mutex);
        }
        let status = match unsafe { &*slot.status.get() } {
            Status::Exited(status) => *status,
            Status::Running => unreachable!("wait loop only exits once not Running"),
            Status::Reaped => unreachable!("joiner_waiting excludes a second reaper"),
        };
        unsafe {
            *slot.status.get() = Status::Reaped;
            *slot.joiner_waiting.get() = false;
        }
        slot.mutex.unlock();
        Ok(status)
    }
}
