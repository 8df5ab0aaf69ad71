//! Global heap allocator for `raw-kernel` builds.
//!
//! The host contract gives us `new_pages`/`remove_pages` and nothing
//! else — no `malloc`, no `brk`. [`linked_list_allocator`] turns one
//! statically sized backing region into a `GlobalAlloc`; [`SpinLock`]
//! makes it safe to call from multiple threads. Host builds skip this
//! entirely and use the toolchain's ordinary allocator, since `std` is
//! available there.

use linked_list_allocator::Heap;

use crate::sync::SpinLock;

/// Backing storage for the bootstrap heap. Sized generously for a
/// threading library's own bookkeeping (TCBs, wait-queue-adjacent
/// allocations, exit-status table nodes); user code running on top of
/// this library is expected to bring its own arena for anything larger.
const HEAP_SIZE: usize = 1 << 20;

#[repr(align(16))]
struct HeapBacking([u8; HEAP_SIZE]);

static mut HEAP_BACKING: HeapBacking = HeapBacking([0; HEAP_SIZE]);

struct LockedHeap {
    heap: SpinLock<Option<Heap>>,
}

unsafe impl Sync for LockedHeap {}

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap {
    heap: SpinLock::new(None),
};

/// Must be called exactly once, before any allocation, from `thr_init`.
pub(crate) fn init() {
    let mut heap = ALLOCATOR.heap.lock();
    assert!(heap.is_none(), "allocator heap initialized twice");
    #[allow(static_mut_refs)]
    unsafe {
        *heap = Some(Heap::new(HEAP_BACKING.0.as_mut_ptr(), HEAP_SIZE));
    }
}

unsafe impl core::alloc::GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        let mut heap = self.heap.lock();
        match heap.as_mut() {
            Some(heap) => heap
                .allocate_first_fit(layout)
                .map(|ptr| ptr.as_ptr())
                .unwrap_or(core::ptr::null_mut()),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: core::alloc::Layout) {
        let mut heap = self.heap.lock();
        if let Some(heap) = heap.as_mut() {
            unsafe {
                heap.deallocate(core::ptr::NonNull::new_unchecked(ptr), layout);
            }
        }
    }
}
