//! Synchronous (blocking) building blocks.
//!
//! The lock itself is asynchronous at its core: a waiting acquirer is a
//! [`Future`](core::future::Future) that registers a
//! [`Waker`](core::task::Waker) and is woken when the token is
//! removed from the slot. This module provides the pieces needed to use it
//! from plain threads as well:
//!
//! - [`Mutex`]: spinlock-protected data, used for the slot's waiter list.
//! - [`block_on`] and [`block_on_deadline`] (with the `std` feature): drive
//!   a future to completion by parking the current thread between polls.
#[cfg(not(loom))]
use crate::{
    loom::cell::{MutPtr, UnsafeCell},
    spin::Spinlock,
    util::fmt,
};

/// A spinlock-protected value.
///
/// Unlike most mutices, this does not hand out guards: the protected data is
/// only reachable inside the closure passed to [`with_lock`], so the critical
/// section cannot outlive the call.
///
/// [`with_lock`]: Mutex::with_lock
#[cfg(not(loom))]
pub(crate) struct Mutex<T> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

#[cfg(not(loom))]
impl<T> Mutex<T> {
    loom_const_fn! {
        /// Returns a new `Mutex` protecting the provided `data`, in the
        /// unlocked state.
        #[must_use]
        pub(crate) fn new(data: T) -> Self {
            Self {
                lock: Spinlock::new(),
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Locks the mutex, spinning until it is available, and calls `f` with
    /// mutable access to the protected data.
    #[cfg_attr(test, track_caller)]
    pub(crate) fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        self.lock.lock();
        let ptr = self.data.get_mut();
        let ret = f(unsafe {
            // Safety: we just acquired the lock.
            ptr.deref()
        });
        unsafe {
            // Safety: we are holding the lock, and `ptr` is no longer used.
            self.lock.unlock();
        }
        ret
    }

    /// Calls `f` with mutable access to the protected data if the mutex can
    /// be locked without spinning, or returns `None`.
    #[cfg_attr(test, track_caller)]
    pub(crate) fn try_with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> Option<U> {
        if !self.lock.try_lock() {
            return None;
        }
        let ptr: MutPtr<T> = self.data.get_mut();
        let ret = f(unsafe {
            // Safety: we just acquired the lock.
            ptr.deref()
        });
        unsafe {
            // Safety: we are holding the lock, and `ptr` is no longer used.
            self.lock.unlock();
        }
        Some(ret)
    }
}

#[cfg(not(loom))]
impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.try_with_lock(|data| {
            f.debug_struct("Mutex")
                .field("data", &*data)
                .field("lock", &self.lock)
                .finish()
        })
        .unwrap_or_else(|| {
            f.debug_struct("Mutex")
                .field("data", &format_args!("<locked>"))
                .field("lock", &self.lock)
                .finish()
        })
    }
}

#[cfg(not(loom))]
unsafe impl<T: Send> Send for Mutex<T> {}
#[cfg(not(loom))]
unsafe impl<T: Send> Sync for Mutex<T> {}

feature! {
    #![all(feature = "std", not(loom))]

    use core::{
        future::Future,
        pin::pin,
        task::{Context, Poll, Waker},
    };
    use std::{
        sync::Arc,
        task::Wake,
        thread::{self, Thread},
        time::Instant,
    };

    /// Wakes a parked thread.
    struct Unparker(Thread);

    impl Wake for Unparker {
        fn wake(self: Arc<Self>) {
            self.0.unpark();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.unpark();
        }
    }

    fn current_thread_waker() -> Waker {
        Waker::from(Arc::new(Unparker(thread::current())))
    }

    /// Polls `future` on the current thread until it completes, parking the
    /// thread whenever it returns [`Poll::Pending`].
    pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
        let mut future = pin!(future);
        let waker = current_thread_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
            test_trace!("block_on: parking");
            thread::park();
        }
    }

    /// Polls `future` on the current thread until it completes or `deadline`
    /// passes, whichever comes first.
    ///
    /// The future is always polled at least once, and once more after the
    /// final park, so a wakeup that arrives right at the deadline still
    /// completes it. If the deadline passes first, the future is dropped
    /// before this returns `None`.
    pub(crate) fn block_on_deadline<F: Future>(future: F, deadline: Instant) -> Option<F::Output> {
        let mut future = pin!(future);
        let waker = current_thread_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Some(output);
            }
            let now = Instant::now();
            if now >= deadline {
                test_debug!("block_on_deadline: deadline elapsed");
                return None;
            }
            test_trace!(remaining = ?(deadline - now), "block_on_deadline: parking");
            thread::park_timeout(deadline - now);
        }
    }
}
