//! Autogrowing root-thread stack.
//!
//! Before a second thread exists, the root thread's stack is allowed to
//! grow downward on demand: a page fault just below the current low
//! bound is treated as "grow the stack", not a crash. A software
//! exception handler is installed on a dedicated alternate stack for
//! exactly this purpose and is torn down the moment a second thread is
//! created — once more than one thread exists there's no longer a single
//! unambiguous stack to grow, so a further fault there is fatal, same as
//! a fault anywhere else.
//!
//! `swexn` auto-deregisters the instant it fires; growing the stack and
//! wanting to stay armed for the *next* fault means re-registering from
//! inside the handler every time.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::sys::{self, PAGE_SIZE};

/// Alternate stack the fault handler itself runs on, since by definition
/// the thread's own stack is the thing that just ran out.
const HANDLER_STACK_SIZE: usize = 4 * PAGE_SIZE;

static ROOT_STACK_HIGH: AtomicUsize = AtomicUsize::new(0);
static ROOT_STACK_LOW: AtomicUsize = AtomicUsize::new(0);
/// How far the root stack is allowed to grow. Generous but finite, so a
/// runaway recursion still faults rather than eating the whole arena.
static ROOT_STACK_LIMIT: AtomicUsize = AtomicUsize::new(0);
static MULTITHREADED: AtomicBool = AtomicBool::new(false);

#[cfg(feature = "raw-kernel")]
static mut HANDLER_STACK: [u8; HANDLER_STACK_SIZE] = [0; HANDLER_STACK_SIZE];

/// Installs the autogrowing-stack handler. Called once from `thr_init`,
/// before any other thread exists, with the root thread's current stack
/// bounds (as reported by the loader).
pub fn install(stack_high: usize, stack_low: usize, growth_budget: usize) {
    ROOT_STACK_HIGH.store(stack_high, Ordering::Relaxed);
    ROOT_STACK_LOW.store(stack_low, Ordering::Relaxed);
    ROOT_STACK_LIMIT.store(stack_low.saturating_sub(growth_budget), Ordering::Relaxed);
    arm_handler();
}

/// `true` if `sp` falls within the root thread's current stack bounds.
/// `thread::current_slot_index` checks this before falling back to the
/// arena grid, since the root stack isn't an arena cell.
pub fn contains(sp: usize) -> bool {
    let high = ROOT_STACK_HIGH.load(Ordering::Relaxed);
    let low = ROOT_STACK_LOW.load(Ordering::Relaxed);
    high != 0 && sp >= low && sp < high
}

/// Disarms the handler. Called the moment `thr_create` spawns the first
/// non-root thread — from then on a fault below the root stack is an
/// ordinary fatal fault, not a growth request.
///
/// This is also the handoff point that patches `main`'s saved return
/// address so that an ordinary `ret` out of `main` lands in `thr_exit`
/// instead of falling off the end of the process's start routine —
/// patching it any earlier (say, in `thr_init`) would freeze the root
/// stack's low bound before a single-threaded program ever gets to grow
/// it, which is the one thing this whole module exists to allow.
pub fn mark_multithreaded() {
    MULTITHREADED.store(true, Ordering::Release);
    sys::deregister_handler();
    #[cfg(feature = "raw-kernel")]
    unsafe {
        patch_root_return_address();
    }
}

/// Walks the saved frame-pointer chain outward from the caller's own
/// frame until it reaches the frame whose saved frame pointer is null —
/// by the platform's calling convention that's the process's start
/// routine, so the frame one step back toward the caller is `main`'s —
/// and overwrites the return-address slot directly above `main`'s saved
/// frame pointer with [`thr_ret2exit`].
///
/// Requires frame pointers to be live in every frame between here and
/// `main`, which only the raw-kernel target's build is set up to
/// guarantee; a host test runs inside the test harness's own call stack,
/// which must never be walked or patched this way, hence this is
/// raw-kernel only.
#[cfg(feature = "raw-kernel")]
unsafe fn patch_root_return_address() {
    #[inline(always)]
    unsafe fn saved_frame_pointer(frame: *mut usize) -> *mut usize {
        unsafe { *frame as *mut usize }
    }

    let mut frame: *mut usize;
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) frame, options(nomem, nostack, preserves_flags));
    }

    loop {
        if frame.is_null() {
            // The chain ran out before finding a null-terminated frame;
            // frame pointers must have been omitted somewhere between
            // here and `main`. Leave `main`'s return address untouched
            // rather than patch the wrong slot.
            return;
        }
        let saved = unsafe { saved_frame_pointer(frame) };
        if saved.is_null() {
            // `frame` is main's own frame: the word directly above its
            // saved frame pointer is its return address.
            let return_addr_slot = unsafe { frame.add(1) };
            unsafe { *return_addr_slot = thr_ret2exit as usize };
            return;
        }
        frame = saved;
    }
}

/// Entered in place of `main`'s real caller once [`patch_root_return_address`]
/// has run: the CPU's return-value register still holds whatever `main`
/// returned, exactly as if this were the original caller, so this reads
/// it and hands it to `thr_exit` the same way any other thread's entry
/// closure's return value does.
#[cfg(feature = "raw-kernel")]
unsafe extern "C" fn thr_ret2exit() -> ! {
    let status: i32;
    unsafe {
        core::arch::asm!("nop", out("eax") status, options(nomem, nostack, preserves_flags));
    }
    crate::thread::thr_exit(status)
}

fn arm_handler() {
    if MULTITHREADED.load(Ordering::Acquire) {
        return;
    }
    #[cfg(feature = "raw-kernel")]
    {
        #[allow(static_mut_refs)]
        let stack_top = unsafe { HANDLER_STACK.as_mut_ptr().add(HANDLER_STACK_SIZE) } as usize;
        sys::register_handler(stack_top, fault_handler, 0, core::ptr::null_mut());
    }
    #[cfg(not(feature = "raw-kernel"))]
    {
        sys::register_handler(0, 0);
    }
}

/// Given a faulting address and the current low bound, decides whether
/// this is a legitimate "grow the stack by one page" fault. Pulled out
/// of the handler itself so the decision can be unit-tested without a
/// real fault.
fn next_low_bound(fault_addr: usize, current_low: usize, limit: usize) -> Option<usize> {
    if fault_addr >= current_low {
        // Not actually below the stack; some other kind of fault.
        return None;
    }
    let new_low = fault_addr & !(PAGE_SIZE - 1);
    if new_low < limit {
        return None;
    }
    Some(new_low)
}

#[cfg(feature = "raw-kernel")]
unsafe extern "C" fn fault_handler(_arg: usize, regs: *mut u8) {
    if MULTITHREADED.load(Ordering::Acquire) {
        return;
    }
    let fault_addr = unsafe { read_fault_address(regs) };
    let current_low = ROOT_STACK_LOW.load(Ordering::Relaxed);
    let limit = ROOT_STACK_LIMIT.load(Ordering::Relaxed);
    match next_low_bound(fault_addr, current_low, limit) {
        Some(new_low) => {
            if sys::new_pages(new_low, current_low - new_low) != sys::NEW_PAGES_OK {
                return;
            }
            ROOT_STACK_LOW.store(new_low, Ordering::Relaxed);
            arm_handler();
        }
        None => {
            // Outside the grow window: leave the handler disarmed and
            // let the fault propagate as fatal on the next occurrence.
        }
    }
}

/// Reads the faulting address out of the architecture's saved register
/// state. The exact offset is part of the host ABI this crate targets;
/// left as a single narrow function so the rest of the handler doesn't
/// need to know about register layout.
#[cfg(feature = "raw-kernel")]
unsafe fn read_fault_address(regs: *mut u8) -> usize {
    const CR2_OFFSET: usize = 0;
    unsafe { *(regs.add(CR2_OFFSET) as *const usize) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_one_page_just_below_low() {
        let low = 0x1000_0000;
        let limit = low - 16 * PAGE_SIZE;
        let fault = low - 1;
        assert_eq!(next_low_bound(fault, low, limit), Some(low - PAGE_SIZE));
    }

    #[test]
    fn refuses_to_grow_past_the_budget() {
        let low = 0x1000_0000;
        let limit = low;
        let fault = low - 1;
        assert_eq!(next_low_bound(fault, low, limit), None);
    }

    #[test]
    fn ignores_faults_above_the_stack() {
        let low = 0x1000_0000;
        assert_eq!(next_low_bound(low + 8, low, 0), None);
    }
}
