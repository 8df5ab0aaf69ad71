//! The host kernel contract: the eight syscalls (plus thread-fork) that
//! everything above this module is built from.
//!
//! Production builds (`--features raw-kernel`) compile [`raw`], a thin
//! `extern "C"` binding layer with no logic beyond the FFI boundary and the
//! stack-less exit tail. Host builds (the default, used by `cargo test` and
//! by every other module's `#[cfg(test)]` unit tests) compile [`mock`], a
//! `std`-backed simulator so the concurrency invariants in the primitives
//! above can be exercised with real OS threads.
//!
//! Nothing outside this module ever names `raw` or `mock` directly; callers
//! use the re-exports below, which is why the two backends must keep
//! identical signatures.

#[cfg(feature = "raw-kernel")]
mod raw;
#[cfg(feature = "raw-kernel")]
pub(crate) use raw::*;

#[cfg(not(feature = "raw-kernel"))]
mod mock;
#[cfg(not(feature = "raw-kernel"))]
pub(crate) use mock::*;

/// Kernel-assigned thread id. Opaque except for the sentinel `-1` meaning
/// "no preferred target" to `yield`.
pub type Ktid = i32;

/// Page size assumed by every `new_pages`/`remove_pages` caller. x86_64
/// on both backends, so one constant serves them both.
pub(crate) const PAGE_SIZE: usize = 4096;

/// `yield`'s "run anything" target.
pub const YIELD_ANY: Ktid = -1;

/// `new_pages` return codes, per the host kernel contract.
pub const NEW_PAGES_OK: i32 = 0;
pub const NEW_PAGES_OVERLAP: i32 = -2;
pub const NEW_PAGES_INSUFFICIENT_RESOURCE: i32 = -1;

/// Treats `new_pages`'s "region already mapped" result as success, which is
/// the expected outcome when allocating a cell's edge page that a neighbor
/// cell already mapped.
pub(crate) fn new_pages_tolerate_overlap(base: usize, len: usize) -> Result<(), i32> {
    match new_pages(base, len) {
        NEW_PAGES_OK | NEW_PAGES_OVERLAP => Ok(()),
        err => Err(err),
    }
}
