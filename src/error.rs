//! Error surface for the fallible (non-misuse) paths of the library.
//!
//! Misuse of a primitive (double-destroy, unlock-while-unlocked, lock
//! recursion, operating on a destroyed object) is a programmer bug and
//! panics at the call site per the host contract's error design; it is
//! deliberately not represented here. This type covers the remaining two
//! error kinds: bad parameters and resource exhaustion.

use core::fmt;

/// A negative kernel result code, as returned by `new_pages`, `yield`,
/// `deschedule`, and friends.
pub type KernelCode = i32;

/// Error returned by the fallible entry points (`thr_create`, `thr_join`,
/// `thr_getid`, `thr_yield`, `*_init`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// A parameter was out of range: zero/negative size, misalignment, or
    /// a tid that was never assigned.
    InvalidArgument,
    /// The heap allocator could not satisfy an allocation the operation
    /// needed (a wait node, a TCB, a stack-arena bookkeeping entry).
    OutOfMemory,
    /// `new_pages` failed for a private region of a new thread's stack.
    AllocationFailed(KernelCode),
    /// The kernel spawn primitive, or another syscall outside the
    /// allocator path, returned a negative result.
    KernelRejected(KernelCode),
    /// The tid named in `thr_join` has already been reaped by a prior
    /// join, or was never created.
    AlreadyReaped,
    /// The tid named in `thr_join` already has a joiner waiting on it.
    AlreadyJoined,
}

impl fmt::Debug for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "InvalidArgument"),
            Self::OutOfMemory => write!(f, "OutOfMemory"),
            Self::AllocationFailed(c) => write!(f, "AllocationFailed({c})"),
            Self::KernelRejected(c) => write!(f, "KernelRejected({c})"),
            Self::AlreadyReaped => write!(f, "AlreadyReaped"),
            Self::AlreadyJoined => write!(f, "AlreadyJoined"),
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "allocator exhausted"),
            Self::AllocationFailed(c) => write!(f, "stack page allocation failed: {c}"),
            Self::KernelRejected(c) => write!(f, "kernel syscall rejected: {c}"),
            Self::AlreadyReaped => write!(f, "thread already reaped by a previous join"),
            Self::AlreadyJoined => write!(f, "thread already has a joiner waiting"),
        }
    }
}

impl core::error::Error for ThreadError {}

pub type Result<T> = core::result::Result<T, ThreadError>;
