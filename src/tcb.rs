//! The thread control block table: one dense, fixed-capacity array of
//! slots, indexed identically to the stack arena's grid in
//! [`crate::arena`]. A thread's TCB slot and its stack cell are always
//! the same index — that's what lets `arena::slot_of(sp)` double as
//! "which TCB does the currently running thread belong to".

use alloc::vec::Vec;

use crate::sys::Ktid;
use crate::sync::SpinLock;

#[derive(Clone, Copy)]
pub struct Tcb {
    pub user_tid: i32,
    pub ktid: Ktid,
}

pub struct TcbTable {
    slots: SpinLock<Vec<Option<Tcb>>>,
}

impl TcbTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity, None);
        TcbTable {
            slots: SpinLock::new(slots),
        }
    }

    pub fn occupy(&self, index: usize, tcb: Tcb) {
        let mut slots = self.slots.lock();
        assert!(slots[index].is_none(), "TCB slot {index} occupied twice");
        slots[index] = Some(tcb);
    }

    /// Fills in a freshly spawned thread's own kernel tid. Called by the
    /// child itself, immediately on start — by the time it runs, the
    /// slot already exists (the parent occupies it before spawning), so
    /// this never races with a lookup that expects the slot to exist.
    pub fn set_ktid(&self, index: usize, ktid: Ktid) {
        let mut slots = self.slots.lock();
        slots[index].as_mut().expect("set_ktid on a vacant slot").ktid = ktid;
    }

    pub fn vacate(&self, index: usize) {
        let mut slots = self.slots.lock();
        assert!(slots[index].is_some(), "TCB slot {index} vacated twice");
        slots[index] = None;
    }

    pub fn get(&self, index: usize) -> Option<Tcb> {
        *self.slots.lock().get(index)?
    }

    pub fn user_tid_of(&self, index: usize) -> Option<i32> {
        self.get(index).map(|tcb| tcb.user_tid)
    }

    /// Linear scan for the kernel tid backing a user tid. The table is
    /// sized for a modest thread count, so this is cheap enough not to
    /// warrant a second index.
    pub fn ktid_of_user_tid(&self, user_tid: i32) -> Option<Ktid> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|tcb| tcb.user_tid == user_tid)
            .map(|tcb| tcb.ktid)
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupy_and_vacate_roundtrip() {
        let table = TcbTable::new(4);
        table.occupy(1, Tcb { user_tid: 10, ktid: 100 });
        assert_eq!(table.get(1).unwrap().user_tid, 10);
        table.vacate(1);
        assert!(table.get(1).is_none());
    }

    #[test]
    #[should_panic(expected = "occupied twice")]
    fn double_occupy_panics() {
        let table = TcbTable::new(4);
        table.occupy(0, Tcb { user_tid: 1, ktid: 1 });
        table.occupy(0, Tcb { user_tid: 2, ktid: 2 });
    }
}
