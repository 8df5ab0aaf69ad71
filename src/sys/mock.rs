//! `std`-backed kernel simulator used whenever `raw-kernel` is off (the
//! default), which is every unit test, every integration test, and any
//! host tool linking this crate directly.
//!
//! The mapping from host primitive to syscall is deliberately literal:
//!
//! - `gettid` / kernel tid → a monotonically increasing counter, one per
//!   OS thread, cached in a thread-local.
//! - `deschedule` / `make_runnable` → [`std::thread::park`] /
//!   [`std::thread::Thread::unpark`]. `park`'s permit semantics give the
//!   same race-free wake-before-sleep guarantee the real syscall pair
//!   provides: a `make_runnable` (unpark) that lands before the matching
//!   `deschedule` (park) is not lost.
//! - `new_pages` / `remove_pages` → a tracked set of mapped page
//!   addresses plus a finite page budget, so the page-liveness invariant
//!   and allocator-exhaustion scenarios (spec §8, scenario 2) are
//!   genuinely exercisable from a host test.
//! - `vanish` → parks the calling thread forever; the real syscall's
//!   "never returns" contract, without actually tearing down the OS
//!   thread a host test needs to remain inert but joinable-by-drop.
//! - `swexn` → accepted and immediately acknowledged; this crate's
//!   autostack page-fault delivery has no host-test equivalent (there is
//!   no real page fault to catch), so the mock only has to satisfy the
//!   registration/deregistration bookkeeping `autostack` relies on.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::Thread;

thread_local! {
    static MY_KTID: Cell<i32> = const { Cell::new(-1) };
    /// The synthetic stack pointer this (simulated) thread was "spawned
    /// on", so `arena::Arena::slot_of` can be exercised identically on
    /// both backends without the mock needing a real stack.
    static MY_FAKE_SP: Cell<usize> = const { Cell::new(0) };
}

static NEXT_KTID: AtomicI32 = AtomicI32::new(1);

fn registry() -> &'static Mutex<HashMap<i32, Thread>> {
    static REGISTRY: std::sync::OnceLock<Mutex<HashMap<i32, Thread>>> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn mapped_pages() -> &'static Mutex<HashSet<usize>> {
    static PAGES: std::sync::OnceLock<Mutex<HashSet<usize>>> = std::sync::OnceLock::new();
    PAGES.get_or_init(|| Mutex::new(HashSet::new()))
}

fn regions() -> &'static Mutex<HashMap<usize, usize>> {
    static REGIONS: std::sync::OnceLock<Mutex<HashMap<usize, usize>>> = std::sync::OnceLock::new();
    REGIONS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Total pages the mock backend will hand out before simulating
/// `INSUFFICIENT_RESOURCE`. Large by default; tests exercising arena
/// exhaustion lower it with [`set_page_budget`].
static PAGE_BUDGET: AtomicIsize = AtomicIsize::new(1 << 30);

pub(crate) use super::PAGE_SIZE as MOCK_PAGE_SIZE;

/// Resets the simulated page budget. Test-only; real backends have no
/// equivalent because the real kernel owns the address space limit.
#[cfg(test)]
pub(crate) fn set_page_budget(pages: isize) {
    PAGE_BUDGET.store(pages, Ordering::SeqCst);
}

fn ensure_ktid() -> i32 {
    MY_KTID.with(|cell| {
        let mut ktid = cell.get();
        if ktid < 0 {
            ktid = NEXT_KTID.fetch_add(1, Ordering::Relaxed);
            cell.set(ktid);
            registry()
                .lock()
                .unwrap()
                .insert(ktid, std::thread::current());
        }
        ktid
    })
}

pub(crate) fn current_ktid() -> i32 {
    ensure_ktid()
}

pub(crate) fn yield_to(_tid: i32) -> i32 {
    std::thread::yield_now();
    0
}

pub(crate) fn deschedule_on(flag: &AtomicI32) -> i32 {
    if flag.load(Ordering::Acquire) != 0 {
        return 0;
    }
    std::thread::park();
    0
}

pub(crate) fn make_runnable_ktid(tid: i32) -> i32 {
    match registry().lock().unwrap().get(&tid) {
        Some(handle) => {
            handle.unpark();
            0
        }
        None => -1,
    }
}

fn page_base(addr: usize) -> usize {
    addr & !(MOCK_PAGE_SIZE - 1)
}

pub(crate) fn new_pages(base: usize, len: usize) -> i32 {
    debug_assert_eq!(base % MOCK_PAGE_SIZE, 0, "new_pages requires a page-aligned base");
    let num_pages = len.div_ceil(MOCK_PAGE_SIZE);
    let mut pages = mapped_pages().lock().unwrap();
    let mut overlap = false;
    for i in 0..num_pages {
        if pages.contains(&(base + i * MOCK_PAGE_SIZE)) {
            overlap = true;
            break;
        }
    }
    if overlap {
        return super::NEW_PAGES_OVERLAP;
    }
    if PAGE_BUDGET.fetch_sub(num_pages as isize, Ordering::SeqCst) < num_pages as isize {
        PAGE_BUDGET.fetch_add(num_pages as isize, Ordering::SeqCst);
        return super::NEW_PAGES_INSUFFICIENT_RESOURCE;
    }
    for i in 0..num_pages {
        pages.insert(base + i * MOCK_PAGE_SIZE);
    }
    regions().lock().unwrap().insert(base, len);
    super::NEW_PAGES_OK
}

pub(crate) fn remove_pages(base: usize) -> i32 {
    let len = match regions().lock().unwrap().remove(&base) {
        Some(len) => len,
        None => return -1,
    };
    let num_pages = len.div_ceil(MOCK_PAGE_SIZE);
    let mut pages = mapped_pages().lock().unwrap();
    for i in 0..num_pages {
        pages.remove(&(base + i * MOCK_PAGE_SIZE));
    }
    PAGE_BUDGET.fetch_add(num_pages as isize, Ordering::SeqCst);
    0
}

/// True if any page in `[base, base+len)` is currently mapped. Used by
/// tests asserting the page-liveness invariant; has no raw-backend
/// equivalent since the real kernel doesn't expose a page query syscall.
#[cfg(test)]
pub(crate) fn any_page_mapped(base: usize, len: usize) -> bool {
    let pages = mapped_pages().lock().unwrap();
    let num_pages = len.div_ceil(MOCK_PAGE_SIZE);
    (0..num_pages).any(|i| pages.contains(&(page_base(base) + i * MOCK_PAGE_SIZE)))
}

pub(crate) fn vanish() -> ! {
    loop {
        std::thread::park();
    }
}

pub(crate) fn set_status(_status: i32) {}

pub(crate) fn register_handler(_stack_top: usize, _arg: usize) -> i32 {
    0
}

pub(crate) fn deregister_handler() -> i32 {
    0
}

#[inline(always)]
pub(crate) fn current_sp() -> usize {
    MY_FAKE_SP.with(Cell::get)
}

/// Records the synthetic stack pointer for the *calling* thread. The
/// root thread calls this once at `thr_init`; spawned threads call it
/// from inside [`spawn_thread`] before running the user entry point.
pub(crate) fn set_current_sp(sp: usize) {
    MY_FAKE_SP.with(|cell| cell.set(sp));
}

/// Host analogue of the kernel spawn primitive. Real backends write the
/// argument and stack index onto the freshly mapped stack and invoke the
/// spawn syscall with a bare trampoline entry point; a host thread has no
/// such memory to write to, so the mock instead hands the already-resolved
/// `(stack_index, arg)` pair straight to the trampoline closure and
/// records the fake stack pointer for [`current_sp`]/[`set_current_sp`].
///
/// Returns the child's kernel tid once it has registered itself, mirroring
/// the real `thread_fork` primitive returning the child's tid synchronously
/// to the parent.
pub(crate) fn spawn_thread(
    stack_top: usize,
    run: impl FnOnce() + Send + 'static,
) -> i32 {
    let (tx, rx) = std::sync::mpsc::channel();
    let builder = std::thread::Builder::new();
    let spawn_result = builder.spawn(move || {
        set_current_sp(stack_top);
        let ktid = ensure_ktid();
        tx.send(ktid).expect("parent dropped spawn rendezvous channel");
        run();
    });
    match spawn_result {
        Ok(handle) => {
            let ktid = rx.recv().expect("child vanished before registering");
            // The mock never joins worker threads explicitly: the library's
            // own join protocol (thr_join) is what this crate is testing,
            // not `std::thread::JoinHandle`. Detach it.
            handle.thread().unpark(); // no-op nudge; keeps clippy quiet about unused handle warnings
            drop(handle);
            ktid
        }
        Err(_) => -1,
    }
}
