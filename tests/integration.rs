//! Cross-module lifecycle and concurrency scenarios, run against the
//! host (mock-kernel) backend. The default, `not(feature = "raw-kernel")`
//! build is the only one these tests make sense for: the autostack
//! page-fault path has no host equivalent (there's no real page fault to
//! deliver), so that scenario is covered at the unit level in
//! `autostack::tests` against its extracted decision function instead.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Once};

use ulthread::sync::{Condvar, Mutex, RwLock, Semaphore};
use ulthread::{thr_create, thr_exit, thr_getid, thr_join, thr_yield};

const STACK_SIZE: usize = 64 * 1024;

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        ulthread::thr_init(STACK_SIZE).expect("thr_init");
    });
}

#[test]
fn many_threads_share_a_mutex_protected_counter() {
    ensure_init();
    let mutex = Arc::new(Mutex::new());
    let counter = Arc::new(AtomicU64::new(0));

    let tids: Vec<i32> = (0..16)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            thr_create(move || {
                for _ in 0..200 {
                    mutex.lock();
                    let seen = counter.load(Ordering::Relaxed);
                    counter.store(seen + 1, Ordering::Relaxed);
                    mutex.unlock();
                }
                0
            })
            .unwrap()
        })
        .collect();

    for tid in tids {
        assert_eq!(thr_join(tid).unwrap(), 0);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 16 * 200);
}

/// A `Vec` whose contents are only ever touched while the accompanying
/// [`Mutex`] is held — the same "external cell guarded by an external
/// lock" shape [`Condvar::wait`] is documented against.
struct Queue {
    mutex: Mutex,
    ready: Condvar,
    items: std::cell::UnsafeCell<Vec<i32>>,
    done: std::cell::UnsafeCell<bool>,
}
unsafe impl Sync for Queue {}

#[test]
fn producer_consumer_over_a_condvar() {
    ensure_init();
    let queue = Arc::new(Queue {
        mutex: Mutex::new(),
        ready: Condvar::new(),
        items: std::cell::UnsafeCell::new(Vec::new()),
        done: std::cell::UnsafeCell::new(false),
    });

    let consumer = {
        let queue = Arc::clone(&queue);
        thr_create(move || {
            let mut total = 0;
            loop {
                queue.mutex.lock();
                while unsafe { (*queue.items.get()).is_empty() } && unsafe { !*queue.done.get() } {
                    queue.ready.wait(&queue.mutex);
                }
                let drained: Vec<i32> = unsafe { (*queue.items.get()).drain(..).collect() };
                let finished = unsafe { *queue.done.get() } && drained.is_empty();
                queue.mutex.unlock();
                total += drained.into_iter().sum::<i32>();
                if finished {
                    break;
                }
            }
            total
        })
        .unwrap()
    };

    for batch in 0..10 {
        queue.mutex.lock();
        unsafe { (*queue.items.get()).push(batch) };
        queue.mutex.unlock();
        queue.ready.signal();
        thr_yield(None).unwrap();
    }
    queue.mutex.lock();
    unsafe { *queue.done.get() = true };
    queue.mutex.unlock();
    queue.ready.signal();

    let total = thr_join(consumer).unwrap();
    assert_eq!(total, (0..10).sum());
}

#[test]
fn semaphore_caps_concurrent_workers() {
    ensure_init();
    let sem = Arc::new(Semaphore::new(3).unwrap());
    let active = Arc::new(AtomicI32::new(0));
    let max_seen = Arc::new(AtomicI32::new(0));

    let tids: Vec<i32> = (0..12)
        .map(|_| {
            let sem = Arc::clone(&sem);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            thr_create(move || {
                sem.wait();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thr_yield(None).unwrap();
                active.fetch_sub(1, Ordering::SeqCst);
                sem.signal();
                0
            })
            .unwrap()
        })
        .collect();

    for tid in tids {
        thr_join(tid).unwrap();
    }
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
}

#[test]
fn rwlock_readers_overlap_writers_dont() {
    ensure_init();
    let lock = Arc::new(RwLock::new());
    let writer_active = Arc::new(AtomicI32::new(0));
    let violations = Arc::new(AtomicI32::new(0));

    let tids: Vec<i32> = (0..10)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let writer_active = Arc::clone(&writer_active);
            let violations = Arc::clone(&violations);
            thr_create(move || {
                if i % 3 == 0 {
                    lock.lock_write();
                    let now = writer_active.fetch_add(1, Ordering::SeqCst) + 1;
                    if now != 1 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    writer_active.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock();
                } else {
                    lock.lock_read();
                    assert_eq!(writer_active.load(Ordering::SeqCst), 0);
                    lock.unlock();
                }
                0
            })
            .unwrap()
        })
        .collect();

    for tid in tids {
        thr_join(tid).unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn a_thread_can_learn_and_report_its_own_tid() {
    ensure_init();
    let tid = thr_create(|| thr_getid()).unwrap();
    let reported = thr_join(tid).unwrap();
    assert_eq!(reported, tid);
}

#[test]
fn thr_exit_from_inside_nested_calls_tears_down_cleanly() {
    ensure_init();

    fn three_deep(status: i32) -> ! {
        fn two_deep(status: i32) -> ! {
            fn one_deep(status: i32) -> ! {
                thr_exit(status)
            }
            one_deep(status)
        }
        two_deep(status)
    }

    let tid = thr_create(move || three_deep(99)).unwrap();
    assert_eq!(thr_join(tid).unwrap(), 99);
}

#[test]
fn joining_twice_is_rejected_the_second_time() {
    ensure_init();
    let tid = thr_create(|| 5).unwrap();
    assert_eq!(thr_join(tid).unwrap(), 5);
    assert!(thr_join(tid).is_err());
}

#[test]
fn stacks_are_reused_after_many_sequential_threads() {
    ensure_init();
    // Each iteration's thread exits and retires its stack before the next
    // is created, so a bounded arena capacity can outlive far more than
    // `capacity` threads over the program's lifetime.
    for i in 0..200 {
        let tid = thr_create(move || i).unwrap();
        assert_eq!(thr_join(tid).unwrap(), i);
    }
}

#[test]
fn threads_can_create_further_threads() {
    ensure_init();
    let outer = thr_create(|| {
        let inner = thr_create(|| 11).unwrap();
        thr_join(inner).unwrap()
    })
    .unwrap();
    assert_eq!(thr_join(outer).unwrap(), 11);
}
