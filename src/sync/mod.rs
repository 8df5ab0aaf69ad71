//! FIFO-fair blocking synchronization built on [`spinlock::SpinLock`] and
//! the kernel's `deschedule`/`make_runnable` pair. Every primitive here
//! queues waiters in arrival order and hands ownership off directly to
//! the next one rather than waking it to race for the lock again.

pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;
pub mod wait_queue;

pub use condvar::Condvar;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::SpinLock;
