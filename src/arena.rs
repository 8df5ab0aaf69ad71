//! Stack arena: a descending grid of fixed-origin cells, one per live
//! thread, laid out back-to-back below a fixed arena ceiling. A cell's
//! index is also its [`crate::tcb::TcbTable`] slot index, so recovering
//! "which thread am I" from a stack pointer is just deciding which
//! cell's address range the pointer falls in.
//!
//! Adjacent cells can end up sharing the page straddling their boundary
//! when a cell's requested size isn't a multiple of the page size, so
//! each allocation is split into up to three `new_pages` calls: a
//! possibly-shared low page, a run of exclusively owned middle pages, and
//! a possibly-shared high page. Retirement mirrors this — a boundary
//! page is only unmapped once no live cell still touches it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::sync::SpinLock;
use crate::sys::{self, PAGE_SIZE};

/// Ceiling address of the arena. Cells are carved downward from here;
/// the root thread's own (separately managed, autogrowing) stack lives
/// above it. An arbitrary but fixed value — nothing below this module
/// interprets it as anything but an integer.
const ARENA_TOP: usize = 0x0000_4000_0000_0000;

fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

fn page_align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// The up-to-three page regions covering `[bottom, top)`, each as
/// `(base, len)`, with `len == 0` meaning "not present". `low` and `high`
/// may be the same single page when the whole range fits in one page;
/// callers must not double-count that case.
struct Regions {
    low: (usize, usize),
    mid: (usize, usize),
    high: (usize, usize),
}

fn split_regions(bottom: usize, top: usize) -> Regions {
    let aligned_bottom = page_align_down(bottom);
    let aligned_top = page_align_up(top);
    let low_page = aligned_bottom;
    let high_page = aligned_top - PAGE_SIZE;

    if low_page == high_page {
        return Regions {
            low: (low_page, PAGE_SIZE),
            mid: (0, 0),
            high: (0, 0),
        };
    }
    let mid_base = low_page + PAGE_SIZE;
    let mid_len = high_page - mid_base;
    Regions {
        low: (low_page, PAGE_SIZE),
        mid: if mid_len > 0 { (mid_base, mid_len) } else { (0, 0) },
        high: (high_page, PAGE_SIZE),
    }
}

#[derive(Clone, Copy)]
struct Cell {
    bottom: usize,
    top: usize,
}

struct Layout {
    /// `cells[i]` is `Some` exactly when TCB slot `i` is occupied.
    cells: Vec<Option<Cell>>,
    /// Free TCB/cell indices, most-recently-freed last.
    free_list: Vec<usize>,
    /// Next never-used index, handed out once the free list is empty.
    high_water: usize,
    /// Reference count of live cells touching each boundary page.
    /// Interior ("mid") pages are never shared and aren't tracked here.
    boundary_refs: BTreeMap<usize, u32>,
}

pub struct Arena {
    layout: SpinLock<Layout>,
    capacity: usize,
    /// Every cell this arena hands out is this many bytes, fixed for the
    /// arena's whole lifetime (one `thr_init` call sets it for the
    /// process). A uniform size is what keeps [`Self::cell_origin`]'s
    /// packing non-overlapping: cells are addressed purely by index, so
    /// two different sizes would make the grid ambiguous.
    cell_size: usize,
    /// This instance's share of the address space below `ARENA_TOP`.
    /// Every `Arena` gets a disjoint slice (see [`Self::new`]), so two
    /// independent instances — as in separate unit tests — never compute
    /// overlapping cell addresses against the shared mock kernel state.
    region_top: usize,
}

/// Width of the address slice handed to each `Arena` instance.
const INSTANCE_STRIDE: usize = 1 << 36;

static NEXT_INSTANCE: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

/// Pages actually belonging to a cell, handed to the exit path so it
/// knows exactly what to `remove_pages` (only the boundary pages it was
/// the last owner of, plus always the middle run).
pub struct Retirement {
    pub regions: [(usize, usize); 3],
}

impl Arena {
    /// `cell_size` is the single stack size every cell this arena ever
    /// hands out will be mapped at — the library-wide size fixed once at
    /// `thr_init`, not a per-`thr_create` choice.
    pub fn new(capacity: usize, cell_size: usize) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        Arena {
            layout: SpinLock::new(Layout {
                cells: (0..capacity).map(|_| None).collect(),
                free_list: Vec::new(),
                high_water: 0,
                boundary_refs: BTreeMap::new(),
            }),
            capacity,
            cell_size,
            region_top: ARENA_TOP - instance * INSTANCE_STRIDE,
        }
    }

    /// Records the root thread's existing stack (handed to us by the
    /// loader, not carved out of the arena grid) as slot 0, so it
    /// participates in [`Self::slot_of`] like any other cell. Must be
    /// the very first call against a fresh `Arena`.
    pub fn reserve_root(&self, bottom: usize, top: usize) -> usize {
        let mut layout = self.layout.lock();
        assert_eq!(layout.high_water, 0, "reserve_root must run before any allocate");
        layout.cells[0] = Some(Cell { bottom, top });
        layout.high_water = 1;
        0
    }

    fn cell_origin(&self, index: usize) -> (usize, usize) {
        // Cells are packed back-to-back at the one fixed `cell_size`, so
        // `index` alone determines an address range no other index can
        // reach — unlike a per-call size, which would let two different
        // sizes carve overlapping ranges for neighboring indices.
        let top = self.region_top - index * self.cell_size;
        (top - self.cell_size, top)
    }

    /// Allocates the next free cell and maps its pages. Returns the slot
    /// index and the usable `[bottom, top)` range on success.
    pub fn allocate(&self) -> Result<(usize, usize, usize), i32> {
        let index = {
            let mut layout = self.layout.lock();
            if let Some(index) = layout.free_list.pop() {
                index
            } else {
                let index = layout.high_water;
                assert!(index < self.capacity, "stack arena exhausted");
                layout.high_water += 1;
                index
            }
        };
        let (bottom, top) = self.cell_origin(index);
        let regions = split_regions(bottom, top);

        let map_boundary = |base: usize, len: usize| -> Result<(), i32> {
            if len == 0 {
                return Ok(());
            }
            sys::new_pages_tolerate_overlap(base, len)?;
            let mut layout = self.layout.lock();
            *layout.boundary_refs.entry(base).or_insert(0) += 1;
            Ok(())
        };

        map_boundary(regions.low.0, regions.low.1)?;
        if regions.mid.1 > 0 {
            match sys::new_pages(regions.mid.0, regions.mid.1) {
                sys::NEW_PAGES_OK => {}
                err => return Err(err),
            }
        }
        if regions.high != regions.low {
            map_boundary(regions.high.0, regions.high.1)?;
        }

        self.layout.lock().cells[index] = Some(Cell { bottom, top });
        Ok((index, bottom, top))
    }

    /// Unmaps whatever pages this cell exclusively owned and returns the
    /// slot to the free list. Must run after the cell's occupant has
    /// already recorded its retirement descriptor (see
    /// [`Self::retirement_of`]) — this only updates bookkeeping, the
    /// caller performs the actual `remove_pages` calls (the raw backend's
    /// stack-less exit tail can't call back into locked Rust code).
    pub fn retire(&self, index: usize) {
        let mut layout = self.layout.lock();
        layout.cells[index] = None;
        layout.free_list.push(index);
    }

    /// Computes which pages `index`'s cell may safely hand back to the
    /// kernel: the middle run unconditionally, and each boundary page
    /// only once this was its last referent. Must be called before
    /// [`Self::retire`] releases the slot.
    pub fn retirement_of(&self, index: usize) -> Retirement {
        let mut layout = self.layout.lock();
        let cell = layout.cells[index].expect("retirement_of on a vacant cell");
        let regions = split_regions(cell.bottom, cell.top);

        let mut release = |base: usize, len: usize| -> (usize, usize) {
            if len == 0 {
                return (0, 0);
            }
            let refcount = layout.boundary_refs.get_mut(&base).expect("untracked boundary page");
            *refcount -= 1;
            if *refcount == 0 {
                layout.boundary_refs.remove(&base);
                (base, len)
            } else {
                (0, 0)
            }
        };

        let low = release(regions.low.0, regions.low.1);
        let high = if regions.high != regions.low {
            release(regions.high.0, regions.high.1)
        } else {
            (0, 0)
        };

        // Ordered low, mid, high: `exit_tail` removes the caller's own
        // currently-active stack page last, and that page is the one
        // nearest the top of the stack (the call depth at `thr_exit` is
        // shallow by construction).
        Retirement {
            regions: [low, regions.mid, high],
        }
    }

    /// Pushes `index` onto the free list without releasing the arena's
    /// lock, returning the raw lock word for [`crate::sys::exit_tail`] to
    /// release by hand once it has finished removing this cell's pages.
    /// Keeping the lock held in between is what stops a concurrent
    /// `allocate` from handing this exact slot to a new thread before the
    /// exiting one is done using its memory.
    pub(crate) fn free_slot_then_leak(&self, index: usize) -> *mut i32 {
        self.layout
            .lock_then_leak(|layout| {
                layout.cells[index] = None;
                layout.free_list.push(index);
            })
            .1
    }

    /// Finds which occupied cell's `[bottom, top)` range contains `sp`,
    /// i.e. which TCB slot the currently running thread belongs to.
    pub fn slot_of(&self, sp: usize) -> Option<usize> {
        let layout = self.layout.lock();
        layout
            .cells
            .iter()
            .position(|cell| matches!(cell, Some(c) if sp >= c.bottom && sp < c.top))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_retire_roundtrip() {
        let arena = Arena::new(8, 4 * PAGE_SIZE);
        let (index, bottom, top) = arena.allocate().unwrap();
        assert_eq!(top - bottom, 4 * PAGE_SIZE);
        assert!(arena.slot_of(bottom + 1).is_some());

        let retirement = arena.retirement_of(index);
        for (base, len) in retirement.regions {
            if len != 0 {
                assert_eq!(sys::remove_pages(base), 0);
            }
        }
        arena.retire(index);
        assert!(arena.slot_of(bottom + 1).is_none());
    }

    #[test]
    fn freed_slot_is_reused() {
        let arena = Arena::new(4, PAGE_SIZE);
        let (first, ..) = arena.allocate().unwrap();
        let retirement = arena.retirement_of(first);
        for (base, len) in retirement.regions {
            if len != 0 {
                sys::remove_pages(base);
            }
        }
        arena.retire(first);
        let (second, ..) = arena.allocate().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn non_page_multiple_size_still_maps() {
        let arena = Arena::new(4, PAGE_SIZE + 17);
        let (_, bottom, top) = arena.allocate().unwrap();
        assert_eq!(top - bottom, PAGE_SIZE + 17);
    }

    #[test]
    fn two_cells_never_overlap() {
        let arena = Arena::new(8, 777);
        let (_, bottom_a, top_a) = arena.allocate().unwrap();
        let (_, bottom_b, top_b) = arena.allocate().unwrap();
        assert!(top_b <= bottom_a || top_a <= bottom_b);
    }
}
