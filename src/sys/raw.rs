//! Raw bindings to the host kernel's eight syscalls, plus the thread-fork
//! and stack-less exit primitives that need inline assembly.
//!
//! This module is pure FFI plumbing: every function here either calls
//! straight through to an `extern "C"` symbol the kernel provides, or is a
//! small `core::arch::asm!` block moving values between registers and the
//! syscall ABI. No bookkeeping, no retries, no logging — those live in the
//! modules that call through [`super`].

use core::arch::asm;

unsafe extern "C" {
    /// Returns the caller's kernel tid.
    fn gettid() -> i32;
    /// Yields the processor; `tid < 0` means "any thread".
    fn r#yield(tid: i32) -> i32;
    /// Atomically checks `*flag`; blocks the caller if it is still zero.
    fn deschedule(flag: *const i32) -> i32;
    /// Makes `tid` runnable.
    fn make_runnable(tid: i32) -> i32;
    /// Maps `len` bytes at `base`, both page-aligned.
    fn new_pages_raw(base: *mut u8, len: usize) -> i32;
    /// Unmaps a region previously returned by `new_pages_raw`.
    fn remove_pages_raw(base: *mut u8) -> i32;
    /// Registers (or, with all-null arguments, deregisters) a software
    /// exception handler on the alternate stack `stack_top`.
    fn swexn_raw(
        stack_top: *mut u8,
        handler: Option<unsafe extern "C" fn(arg: usize, regs: *mut u8)>,
        arg: usize,
        saved_regs: *mut u8,
    ) -> i32;
    /// Terminates the calling thread. Never returns.
    fn vanish_raw() -> !;
    /// Sets this task's exit status.
    fn set_status_raw(status: i32);
    /// Spawns a new kernel thread that begins executing `entry` with the
    /// stack pointer set to `stack_top`. Returns the child's kernel tid to
    /// the parent, and never returns in the child (the child starts fresh
    /// at `entry`).
    fn thread_fork_raw(entry: unsafe extern "C" fn() -> !, stack_top: *mut u8) -> i32;
}

pub(crate) fn current_ktid() -> i32 {
    unsafe { gettid() }
}

pub(crate) fn yield_to(tid: i32) -> i32 {
    unsafe { r#yield(tid) }
}

pub(crate) fn deschedule_on(flag: &core::sync::atomic::AtomicI32) -> i32 {
    unsafe { deschedule(flag.as_ptr() as *const i32) }
}

pub(crate) fn make_runnable_ktid(tid: i32) -> i32 {
    unsafe { make_runnable(tid) }
}

pub(crate) fn new_pages(base: usize, len: usize) -> i32 {
    unsafe { new_pages_raw(base as *mut u8, len) }
}

pub(crate) fn remove_pages(base: usize) -> i32 {
    unsafe { remove_pages_raw(base as *mut u8) }
}

pub(crate) fn vanish() -> ! {
    unsafe { vanish_raw() }
}

pub(crate) fn set_status(status: i32) {
    unsafe { set_status_raw(status) }
}

pub(crate) fn register_handler(
    stack_top: usize,
    handler: unsafe extern "C" fn(usize, *mut u8),
    arg: usize,
    saved_regs: *mut u8,
) -> i32 {
    unsafe { swexn_raw(stack_top as *mut u8, Some(handler), arg, saved_regs) }
}

pub(crate) fn deregister_handler() -> i32 {
    unsafe { swexn_raw(core::ptr::null_mut(), None, 0, core::ptr::null_mut()) }
}

/// Spawns a kernel thread running `entry` on `stack_top`. `entry` is the
/// library's own trampoline (see `thread::trampoline_entry`); it reads the
/// stack-index word the caller wrote below `stack_top` to find its TCB.
pub(crate) fn spawn_thread(entry: unsafe extern "C" fn() -> !, stack_top: usize) -> i32 {
    unsafe { thread_fork_raw(entry, stack_top as *mut u8) }
}

/// Returns the current stack pointer. Used by `arena::Arena::slot_of` to
/// map a running thread back to its TCB slot.
#[inline(always)]
pub(crate) fn current_sp() -> usize {
    let sp: usize;
    unsafe {
        asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}

/// The exit tail: releases the TCB array's inner spinlock by hand, removes
/// the caller's own currently-active stack region, and vanishes — without
/// ever putting a `call`/`ret` frame on the stack page being removed,
/// since another thread may reuse this stack cell the instant that page
/// is unmapped.
///
/// `region`, if non-empty, necessarily overlaps the stack the caller is
/// standing on right now (see `thread::exit_current`, which already
/// removes every other region through an ordinary call before reaching
/// here). An ordinary `call remove_pages_raw` would push its own return
/// address onto that very page — safe only until the page is actually
/// unmapped, at which point the matching `ret` reads a return address out
/// of memory that no longer exists. So this switches `rsp` onto a small
/// caller-supplied scratch stack first, and the removal, the vanish, and
/// every `call`/`ret` either one needs stay on that scratch stack instead.
///
/// # Safety
///
/// `spinlock_word` must point at the TCB table's inner spinlock word.
/// `scratch_stack_top` must point one-past-the-end of a stack region
/// exclusively owned by the caller for the remainder of this call — no
/// other thread may be using it concurrently. `region` must list only a
/// page this thread exclusively owns. Control never returns.
pub(crate) unsafe fn exit_tail(
    spinlock_word: *mut i32,
    scratch_stack_top: usize,
    region: (usize, usize),
) -> ! {
    // Unlock by hand (spinlock unlock is a single atomic store of 1).
    unsafe {
        asm!(
            "mov dword ptr [{lock}], 1",
            lock = in(reg) spinlock_word,
            options(nostack),
        );
    }
    let (base, len) = region;
    if len == 0 {
        vanish();
    }
    unsafe {
        asm!(
            "mov rsp, {scratch}",
            "mov rdi, {base}",
            "call {remove_pages}",
            "call {vanish}",
            scratch = in(reg) scratch_stack_top,
            base = in(reg) base,
            remove_pages = sym remove_pages_raw,
            vanish = sym vanish_raw,
            options(noreturn),
        )
    }
}
