//! Top-level thread lifecycle: `thr_init`, `thr_create`, `thr_join`,
//! `thr_exit`, `thr_getid`, `thr_yield`.
//!
//! This is the one module that reaches into every other piece of the
//! crate — [`crate::arena`] for stack memory, [`crate::tcb`] for identity,
//! [`crate::exit_table`] for join/reap bookkeeping, and [`crate::autostack`]
//! to retire the root thread's special growth handling the moment a
//! second thread exists.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicI32, Ordering};

use crate::arena::Arena;
use crate::autostack;
use crate::error::{Result, ThreadError};
use crate::exit_table::ExitTable;
use crate::sync::SpinLock;
use crate::sys;
use crate::tcb::{Tcb, TcbTable};

/// Thread capacity this library is sized for. Not a hard architectural
/// limit, just how big the dense TCB/arena tables start out.
const DEFAULT_CAPACITY: usize = 1024;

/// How far below its initial low bound the root thread's stack is
/// allowed to autogrow before a fault there is treated as fatal, same as
/// anywhere else.
const ROOT_GROWTH_BUDGET: usize = 256 * sys::PAGE_SIZE;

const ROOT_USER_TID: i32 = 0;

/// Conventional high address for the root thread's stack, the way a
/// loader on this architecture customarily places the initial stack near
/// the top of the user address space. Fixed and arbitrary in the same
/// spirit as `arena::ARENA_TOP` — nothing below this module interprets it
/// as anything but an integer, and the arena already carves its own grid
/// well clear of it.
const ROOT_STACK_HIGH: usize = 0x0000_7fff_ff00_0000;

struct LibraryState {
    tcb: TcbTable,
    arena: Arena,
    exits: ExitTable,
}

/// Small scratch stacks `exit_tail` switches onto before the final
/// `remove_pages`/`vanish` pair, one per arena slot so concurrently
/// exiting threads never share one. Indexed by the same slot index the
/// arena and TCB table already use for that thread.
#[cfg(feature = "raw-kernel")]
const EXIT_SCRATCH_WORDS: usize = 32;
#[cfg(feature = "raw-kernel")]
static mut EXIT_SCRATCH: [[usize; EXIT_SCRATCH_WORDS]; DEFAULT_CAPACITY] =
    [[0; EXIT_SCRATCH_WORDS]; DEFAULT_CAPACITY];

static STATE: SpinLock<Option<LibraryState>> = SpinLock::new(None);
static NEXT_USER_TID: AtomicI32 = AtomicI32::new(ROOT_USER_TID + 1);

fn with_state<R>(f: impl FnOnce(&LibraryState) -> R) -> R {
    let guard = STATE.lock();
    let state = guard.as_ref().expect("ulthread: thr_init was never called");
    f(state)
}

/// Brings the threading library up: installs the root thread's own TCB
/// and stack-arena entries and arms the autogrowing-stack handler.
/// `stack_size` is the single stack size every thread this process ever
/// creates will get, root included — it is also the arena's fixed cell
/// size (see [`Arena::new`]). Must be called exactly once, before any
/// other entry point in this module.
pub fn thr_init(stack_size: usize) -> Result<()> {
    #[cfg(feature = "raw-kernel")]
    crate::alloc_shim::init();

    if stack_size == 0 {
        return Err(ThreadError::InvalidArgument);
    }

    let mut guard = STATE.lock();
    if guard.is_some() {
        return Err(ThreadError::InvalidArgument);
    }

    let stack_high = ROOT_STACK_HIGH;
    let stack_low = stack_high - stack_size;

    let tcb = TcbTable::new(DEFAULT_CAPACITY);
    let arena = Arena::new(DEFAULT_CAPACITY, stack_size);
    let exits = ExitTable::new(DEFAULT_CAPACITY);

    let root_index = arena.reserve_root(stack_low, stack_high);
    let root_ktid = sys::current_ktid();
    tcb.occupy(root_index, Tcb { user_tid: ROOT_USER_TID, ktid: root_ktid });
    exits.register(ROOT_USER_TID);

    #[cfg(not(feature = "raw-kernel"))]
    sys::set_current_sp(stack_high.saturating_sub(8));

    *guard = Some(LibraryState { tcb, arena, exits });
    drop(guard);

    autostack::install(stack_high, stack_low, ROOT_GROWTH_BUDGET);
    log::debug!("thr_init: root thread ready (ktid={root_ktid}, stack_size={stack_size})");
    Ok(())
}

/// Spawns a new thread running `f` on a freshly allocated stack,
/// returning its user-visible tid. `f`'s return value becomes the status
/// a later `thr_join` collects. Every thread gets the one stack size
/// fixed by `thr_init`.
pub fn thr_create<F>(f: F) -> Result<i32>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    autostack::mark_multithreaded();

    let (index, _bottom, top) =
        with_state(|state| state.arena.allocate()).map_err(ThreadError::AllocationFailed)?;

    let user_tid = NEXT_USER_TID.fetch_add(1, Ordering::Relaxed);
    with_state(|state| {
        // ktid filled in by the child itself, the instant it starts; see
        // `trampoline_body`.
        state.tcb.occupy(index, Tcb { user_tid, ktid: 0 });
        state.exits.register(user_tid);
    });

    let thunk: Box<dyn FnOnce() -> i32 + Send> = Box::new(f);
    let arg = Box::into_raw(Box::new(thunk)) as usize;

    let spawn_result = spawn_child(index, arg, top);
    if spawn_result < 0 {
        // Unwind everything we reserved; the thread never actually ran.
        unsafe {
            drop(Box::from_raw(arg as *mut Box<dyn FnOnce() -> i32 + Send>));
        }
        let retirement = with_state(|state| {
            state.tcb.vacate(index);
            state.exits.forget(user_tid);
            state.arena.retirement_of(index)
        });
        for (base, len) in retirement.regions {
            if len != 0 {
                sys::remove_pages(base);
            }
        }
        with_state(|state| state.arena.retire(index));
        log::warn!("thr_create: kernel spawn rejected for index={index}");
        return Err(ThreadError::KernelRejected(spawn_result));
    }

    log::debug!("thr_create: spawned user_tid={user_tid} index={index}");
    Ok(user_tid)
}

#[cfg(feature = "raw-kernel")]
fn spawn_child(index: usize, arg: usize, stack_top: usize) -> i32 {
    // The child's very first instructions (see `trampoline_entry_raw`)
    // read these two words back out, so they must already be in place
    // before the kernel's spawn primitive can possibly start the child.
    unsafe {
        *((stack_top - 8) as *mut usize) = arg;
        *((stack_top - 16) as *mut usize) = index;
    }
    sys::spawn_thread(trampoline_entry_raw, stack_top)
}

#[cfg(not(feature = "raw-kernel"))]
fn spawn_child(index: usize, arg: usize, stack_top: usize) -> i32 {
    sys::spawn_thread(stack_top, move || trampoline_body(index, arg))
}

#[cfg(feature = "raw-kernel")]
unsafe extern "C" fn trampoline_entry_raw() -> ! {
    let stack_top = sys::current_sp();
    let index = unsafe { *((stack_top - 16) as *const usize) };
    let arg = unsafe { *((stack_top - 8) as *const usize) };
    trampoline_body(index, arg)
}

/// Runs on the new thread, on both backends. Resolves its own kernel
/// tid, runs the user closure, and feeds the result into the exit path.
fn trampoline_body(index: usize, arg: usize) -> ! {
    let ktid = sys::current_ktid();
    let user_tid = with_state(|state| {
        state.tcb.set_ktid(index, ktid);
        state.tcb.user_tid_of(index).expect("tcb slot vacant at trampoline start")
    });

    let thunk: Box<Box<dyn FnOnce() -> i32 + Send>> = unsafe { Box::from_raw(arg as *mut _) };
    let status = (*thunk)();

    exit_current(index, user_tid, status)
}

fn exit_current(index: usize, user_tid: i32, status: i32) -> ! {
    let retirement = with_state(|state| {
        state.exits.mark_exited(user_tid, status);
        state.tcb.vacate(index);
        state.arena.retirement_of(index)
    });
    log::debug!("thr_exit: user_tid={user_tid} status={status}");

    #[cfg(not(feature = "raw-kernel"))]
    {
        for (base, len) in retirement.regions {
            if len != 0 {
                sys::remove_pages(base);
            }
        }
        with_state(|state| state.arena.retire(index));
        sys::vanish()
    }

    #[cfg(feature = "raw-kernel")]
    {
        // The first two regions never overlap the page the CPU is
        // currently executing on (see `arena::Retirement`); removing
        // them through a normal call is safe.
        for &(base, len) in &retirement.regions[..2] {
            if len != 0 {
                sys::remove_pages(base);
            }
        }
        let word_ptr = with_state(|state| state.arena.free_slot_then_leak(index));
        // SAFETY: `index < DEFAULT_CAPACITY` always holds — it is an
        // arena slot index, and the arena was sized to `DEFAULT_CAPACITY`.
        // No other thread touches this slot's scratch stack: each live
        // thread owns exactly one arena slot for its whole lifetime.
        let scratch_top = unsafe {
            #[allow(static_mut_refs)]
            EXIT_SCRATCH[index].as_mut_ptr().add(EXIT_SCRATCH_WORDS) as usize
        };
        unsafe { sys::exit_tail(word_ptr, scratch_top, retirement.regions[2]) }
    }
}

/// Terminates the calling thread with `status`, as if its entry closure
/// had returned `status`. Never returns.
pub fn thr_exit(status: i32) -> ! {
    let sp = sys::current_sp();
    let index = current_slot_index(sp).expect("thr_exit called on an unregistered thread");
    let user_tid = with_state(|state| state.tcb.user_tid_of(index)).expect("thr_exit on a vacant slot");
    exit_current(index, user_tid, status)
}

/// Blocks until `tid` exits, then returns the status it exited with.
/// Each tid may be successfully joined exactly once.
pub fn thr_join(tid: i32) -> Result<i32> {
    with_state(|state| state.exits.join(tid))
}

/// The calling thread's own user-visible tid.
pub fn thr_getid() -> i32 {
    let sp = sys::current_sp();
    let index = current_slot_index(sp).expect("thr_getid called on an unregistered thread");
    with_state(|state| state.tcb.user_tid_of(index)).expect("thr_getid on a vacant slot")
}

/// Yields the processor. `target`, if given, is a user tid to prefer
/// scheduling next; `None` means "anything".
pub fn thr_yield(target: Option<i32>) -> Result<()> {
    let ktid = match target {
        Some(user_tid) => with_state(|state| state.tcb.ktid_of_user_tid(user_tid))
            .ok_or(ThreadError::InvalidArgument)?,
        None => sys::YIELD_ANY,
    };
    if sys::yield_to(ktid) < 0 {
        return Err(ThreadError::KernelRejected(-1));
    }
    Ok(())
}

fn current_slot_index(sp: usize) -> Option<usize> {
    if autostack::contains(sp) {
        return Some(0);
    }
    with_state(|state| state.arena.slot_of(sp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as StdOrdering};
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_init() {
        INIT.call_once(|| {
            thr_init(64 * 1024).unwrap();
        });
    }

    #[test]
    fn create_and_join_returns_status() {
        ensure_init();
        let tid = thr_create(|| 42).unwrap();
        assert_eq!(thr_join(tid).unwrap(), 42);
    }

    #[test]
    fn second_join_fails() {
        ensure_init();
        let tid = thr_create(|| 7).unwrap();
        assert_eq!(thr_join(tid).unwrap(), 7);
        assert!(thr_join(tid).is_err());
    }

    #[test]
    fn child_observes_its_own_tid_via_getid() {
        ensure_init();
        let seen = std::sync::Arc::new(AtomicBool::new(false));
        let seen2 = std::sync::Arc::clone(&seen);
        let tid = thr_create(move || {
            let my_id = thr_getid();
            seen2.store(my_id != ROOT_USER_TID, StdOrdering::SeqCst);
            0
        })
        .unwrap();
        thr_join(tid).unwrap();
        assert!(seen.load(StdOrdering::SeqCst));
    }

    #[test]
    fn many_threads_run_and_join() {
        ensure_init();
        let tids: Vec<i32> = (0..32).map(|i| thr_create(move || i).unwrap()).collect();
        for (i, tid) in tids.into_iter().enumerate() {
            assert_eq!(thr_join(tid).unwrap(), i as i32);
        }
    }
}
