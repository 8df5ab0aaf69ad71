//! A user-space threading library built directly on eight kernel
//! primitives: `gettid`, `yield`, `deschedule`, `make_runnable`,
//! `new_pages`, `remove_pages`, `swexn`, and `vanish`.
//!
//! This crate owns three things the kernel doesn't provide:
//!
//! - **Stack memory.** [`arena`] carves a grid of per-thread stacks out
//!   of a fixed region, mapping and unmapping pages as threads come and
//!   go; [`autostack`] lets the root thread's own stack grow on demand
//!   until a second thread exists.
//! - **Identity and lifecycle.** [`tcb`] and [`exit_table`] track which
//!   kernel tid belongs to which user-visible tid, and let `thr_join`
//!   block until the right one exits exactly once.
//! - **Fair blocking synchronization.** [`sync`] builds a FIFO-fair
//!   mutex, condvar, semaphore and rwlock on top of a bounded spinlock
//!   and the kernel's deschedule/make_runnable pair.
//!
//! The [`thread`] module ties these together into the public entry
//! points: [`thread::thr_init`], [`thread::thr_create`],
//! [`thread::thr_join`], [`thread::thr_exit`], [`thread::thr_getid`], and
//! [`thread::thr_yield`].
//!
//! Two kernel backends exist behind [`sys`]: a `raw-kernel`-feature
//! `extern "C"` binding layer for the real target, and a `std`-backed
//! simulator (the default) that every test in this crate runs against.

#![cfg_attr(feature = "raw-kernel", no_std)]

extern crate alloc;

#[cfg(feature = "raw-kernel")]
mod alloc_shim;
pub mod arena;
pub mod autostack;
pub mod error;
pub mod exit_table;
mod hashtable;
pub mod sync;
pub mod sys;
pub mod tcb;
pub mod thread;

pub use error::{Result, ThreadError};
pub use thread::{thr_create, thr_exit, thr_getid, thr_init, thr_join, thr_yield};
