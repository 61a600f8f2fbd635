use super::*;
use crate::util::test::{assert_future, assert_send_sync};


#[test]
fn futures_are_futures() {
    assert_future::<Acquire<'_>>();
    assert_future::<Lock<'_, usize>>();
    assert_future::<AcquireCancellable<'_, core::future::Ready<()>>>();
}

#[test]
fn send_sync() {
    fn assert_send<T: Send>() {}

    assert_send_sync::<CancelMutex>();
    assert_send_sync::<Mutex<usize>>();
    assert_send::<Acquire<'_>>();
    assert_send::<Lock<'_, usize>>();
    assert_send::<MutexGuard<'_, usize>>();
}

#[cfg(not(loom))]
mod single_threaded {
    use super::*;
    use crate::util::test::trace_init;
    use core::future::{pending, ready};
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, assert_ready_ok, task};

    #[test]
    fn acquire_release_alternates() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();

        for _ in 0..8 {
            assert!(!mutex.is_locked());
            mutex.acquire();
            assert!(mutex.is_locked());
            mutex.release();
            assert!(!mutex.is_locked());
        }
    }

    #[test]
    fn try_acquire_on_locked_leaves_state() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        assert!(!mutex.try_acquire());
        assert!(mutex.is_locked());

        // the real holder can still release it, exactly once.
        mutex.release();
        assert!(!mutex.is_locked());
        assert!(mutex.try_acquire());
        mutex.release();
    }

    #[test]
    #[should_panic(expected = "unlock of unlocked mutex")]
    fn release_fresh_mutex_panics() {
        let mutex = CancelMutex::new();
        mutex.release();
    }

    #[test]
    #[should_panic(expected = "unlock of unlocked mutex")]
    fn double_release_panics() {
        let mutex = CancelMutex::default();
        mutex.acquire();
        mutex.release();
        mutex.release();
    }

    #[test]
    fn cancellable_with_fired_signal_on_locked_mutex() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        let res = tokio_test::block_on(mutex.acquire_cancellable(ready("cancelled")));
        let err = res.unwrap_err();
        assert_eq!(err.reason(), &"cancelled");
        assert_eq!(
            err.to_string(),
            "lock acquisition cancelled: cancelled"
        );

        // the cancelled acquisition never inserted a token.
        assert!(mutex.is_locked());
        mutex.release();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn cancellable_prefers_acquisition() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();

        let res = tokio_test::block_on(mutex.acquire_cancellable(ready(())));
        assert_eq!(res, Ok(()));
        assert!(mutex.is_locked());
        mutex.release();
    }

    #[test]
    fn cancellable_acquires_after_release() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        let mut acquire = task::spawn(mutex.acquire_cancellable(pending::<()>()));
        assert_pending!(acquire.poll());

        mutex.release();
        assert!(acquire.is_woken());
        assert_ready_ok!(acquire.poll());
        assert!(mutex.is_locked());
        mutex.release();
    }

    #[test]
    fn cancelled_waiter_does_not_swallow_wakeup() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        let (cancel, cancelled) = tokio::sync::oneshot::channel::<()>();
        let mut first = task::spawn(mutex.acquire_cancellable(cancelled));
        let mut second = task::spawn(mutex.wait_endpoint());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        cancel.send(()).unwrap();
        assert!(first.is_woken());
        assert_ready_err!(first.poll());
        assert!(!second.is_woken());

        mutex.release();
        assert!(second.is_woken());
        assert_ready!(second.poll());
        assert!(mutex.is_locked());
        mutex.release();
    }

    #[test]
    fn dropped_wait_endpoint_does_not_acquire() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        let mut acquire = task::spawn(mutex.wait_endpoint());
        assert_pending!(acquire.poll());
        drop(acquire);

        mutex.release();
        assert!(!mutex.is_locked());
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn lock_polled_after_completion_panics() {
        let _trace = trace_init();
        let mutex = Mutex::new(1);

        let mut lock = task::spawn(mutex.lock());
        let _guard = assert_ready!(lock.poll());

        // must not hand out a second guard to the same data.
        let _ = lock.poll();
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn wait_endpoint_polled_after_completion_panics() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();

        let mut acquire = task::spawn(mutex.wait_endpoint());
        assert_ready!(acquire.poll());
        assert!(mutex.is_locked());

        let _ = acquire.poll();
    }

    #[test]
    fn mutex_data_access() {
        let _trace = trace_init();
        let mut mutex = Mutex::new(1);

        *mutex.get_mut() += 1;
        {
            let mut guard = mutex.lock_blocking();
            assert!(mutex.is_locked());
            assert!(mutex.try_lock().is_none());
            *guard += 1;
        }
        assert!(!mutex.is_locked());

        let mut guard = mutex.try_lock().expect("mutex is unlocked");
        *guard += 1;
        drop(guard);

        tokio_test::block_on(async {
            let mut guard = mutex.lock().await;
            *guard += 1;
        });

        assert_eq!(mutex.into_inner(), 5);
    }

    #[test]
    fn mutex_debug() {
        let mutex = Mutex::new(42usize);
        assert_eq!(format!("{mutex:?}"), "Mutex { data: 42 }");

        let guard = mutex.try_lock().unwrap();
        assert_eq!(format!("{mutex:?}"), "Mutex { data: <locked> }");
        assert_eq!(format!("{guard:?}"), "42");
    }

    #[test]
    fn lock_cancellable() {
        let _trace = trace_init();
        let mutex = Mutex::<usize>::default();

        tokio_test::block_on(async {
            let guard = mutex.lock_cancellable(pending::<()>()).await.unwrap();
            let err = mutex
                .lock_cancellable(ready("busy"))
                .await
                .expect_err("mutex is locked");
            assert_eq!(err.into_reason(), "busy");
            drop(guard);

            let guard = mutex.lock_cancellable(ready("busy")).await.unwrap();
            assert_eq!(*guard, 0);
        });
    }

    proptest::proptest! {
        #[test]
        fn sequential_ops_track_lock_state(ops in proptest::collection::vec(0u8..4, 0..64)) {
            let mutex = CancelMutex::new();
            let mut locked = false;

            for op in ops {
                match op {
                    0 if !locked => {
                        mutex.acquire();
                        locked = true;
                    }
                    1 => {
                        let acquired = mutex.try_acquire();
                        proptest::prop_assert_eq!(acquired, !locked);
                        locked = true;
                    }
                    2 => {
                        let res = tokio_test::block_on(mutex.acquire_cancellable(ready(())));
                        proptest::prop_assert_eq!(res.is_ok(), !locked);
                        locked = true;
                    }
                    _ if locked => {
                        mutex.release();
                        locked = false;
                    }
                    _ => {}
                }
                proptest::prop_assert_eq!(mutex.is_locked(), locked);
            }
        }
    }
}

#[cfg(all(feature = "std", not(loom)))]
mod std_tests {
    use super::*;
    use crate::{cancel::TimedOut, loom::thread, util::test::trace_init};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering::SeqCst},
            Arc,
        },
        time::{Duration, Instant},
    };

    #[test]
    fn threads_each_hold_exactly_once() {
        const THREADS: usize = 8;
        let _trace = trace_init();

        let mutex = Arc::new(CancelMutex::new());
        let holders = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(AtomicUsize::new(0));

        mutex.acquire();
        let threads = (0..THREADS)
            .map(|_| {
                let mutex = mutex.clone();
                let holders = holders.clone();
                let held = held.clone();
                thread::spawn(move || {
                    mutex.acquire();
                    assert_eq!(holders.fetch_add(1, SeqCst), 0, "two threads hold the lock");
                    held.fetch_add(1, SeqCst);
                    holders.fetch_sub(1, SeqCst);
                    mutex.release();
                })
            })
            .collect::<Vec<_>>();

        // nobody gets in while the main thread holds the lock.
        thread::yield_now();
        assert_eq!(held.load(SeqCst), 0);
        mutex.release();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(held.load(SeqCst), THREADS);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn contended_counter() {
        const THREADS: usize = 4;
        const ITERS: usize = 500;
        let _trace = crate::util::test::trace_init_with_default("info");

        let mutex = Arc::new(Mutex::new(0usize));
        let threads = (0..THREADS)
            .map(|i| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        // mix the blocking and non-blocking paths.
                        let mut guard = if i % 2 == 0 {
                            mutex.lock_blocking()
                        } else {
                            loop {
                                if let Some(guard) = mutex.try_lock() {
                                    break guard;
                                }
                                thread::yield_now();
                            }
                        };
                        *guard += 1;
                    }
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*mutex.lock_blocking(), THREADS * ITERS);
    }

    #[test]
    fn concurrent_first_use() {
        const THREADS: usize = 8;
        static MUTEX: CancelMutex = CancelMutex::new();
        static ACQUIRED: AtomicUsize = AtomicUsize::new(0);
        let _trace = trace_init();

        let threads = (0..THREADS)
            .map(|_| {
                thread::spawn(|| {
                    if MUTEX.try_acquire() {
                        ACQUIRED.fetch_add(1, SeqCst);
                    }
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(ACQUIRED.load(SeqCst), 1);
        assert!(MUTEX.is_locked());
        MUTEX.release();
    }

    #[test]
    fn concurrent_first_use_blocking() {
        const THREADS: usize = 8;
        const ITERS: usize = 50;
        static MUTEX: CancelMutex = CancelMutex::new();
        static HOLDERS: AtomicUsize = AtomicUsize::new(0);
        static ACQUIRED: AtomicUsize = AtomicUsize::new(0);
        let _trace = trace_init();

        // nothing touches `MUTEX` before the threads race to use it, and
        // each thread's first operation differs.
        let threads = (0..THREADS)
            .map(|i| {
                thread::spawn(move || {
                    for n in 0..ITERS {
                        match (i + n) % 3 {
                            0 => MUTEX.acquire(),
                            1 => MUTEX
                                .acquire_timeout(Duration::from_secs(30))
                                .expect("lock must become available"),
                            _ => {
                                let _ = MUTEX.is_locked();
                                tokio_test::block_on(MUTEX.wait_endpoint());
                            }
                        }
                        assert_eq!(HOLDERS.fetch_add(1, SeqCst), 0, "two threads hold the lock");
                        ACQUIRED.fetch_add(1, SeqCst);
                        HOLDERS.fetch_sub(1, SeqCst);
                        MUTEX.release();
                    }
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(ACQUIRED.load(SeqCst), THREADS * ITERS);
        assert!(!MUTEX.is_locked());
    }

    #[test]
    fn acquire_timeout_elapses() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        mutex.acquire();

        let timeout = Duration::from_millis(20);
        let start = Instant::now();
        let err = mutex.acquire_timeout(timeout).unwrap_err();
        assert!(start.elapsed() >= timeout);
        assert_eq!(err.into_reason(), TimedOut::new());
        assert!(mutex.is_locked());
        mutex.release();
    }

    #[test]
    fn acquire_timeout_on_unlocked() {
        let _trace = trace_init();
        let mutex = CancelMutex::new();
        assert_eq!(mutex.acquire_timeout(Duration::ZERO), Ok(()));
        assert!(mutex.is_locked());
        assert!(mutex.acquire_timeout(Duration::ZERO).is_err());
        mutex.release();

        assert_eq!(mutex.acquire_timeout(Duration::MAX), Ok(()));
        mutex.release();
    }

    #[test]
    fn acquire_timeout_woken_by_release() {
        let _trace = trace_init();
        let mutex = Arc::new(CancelMutex::new());
        mutex.acquire();

        let thread = thread::spawn({
            let mutex = mutex.clone();
            move || {
                std::thread::sleep(Duration::from_millis(10));
                mutex.release();
            }
        });

        assert_eq!(mutex.acquire_timeout(Duration::from_secs(30)), Ok(()));
        thread.join().unwrap();
        mutex.release();
    }

    #[test]
    fn lock_timeout() {
        let _trace = trace_init();
        let mutex = Mutex::new("hello");

        let guard = mutex.lock_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(*guard, "hello");
        assert!(mutex.lock_timeout(Duration::from_millis(5)).is_err());
        drop(guard);
        assert!(mutex.lock_timeout(Duration::from_millis(5)).is_ok());
    }

    #[test]
    #[cfg(feature = "lock_api")]
    fn blocking_mutex() {
        let _trace = trace_init();
        let mutex = Arc::new(crate::BlockingMutex::new(0usize));

        let threads = (0..4)
            .map(|_| {
                let mutex = mutex.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }

        let guard = mutex.lock();
        assert_eq!(*guard, 400);
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(!mutex.is_locked());
    }
}
