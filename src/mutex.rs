//! A [mutual exclusion lock] whose acquisition can be cancelled, or composed
//! with other wait conditions.
//!
//! See the documentation on the [`CancelMutex`] and [`Mutex`] types for
//! details.
//!
//! [mutual exclusion lock]: https://en.wikipedia.org/wiki/Mutual_exclusion
use crate::{
    cancel::{AcquireCancellable, Cancelled},
    loom::cell::{MutPtr, UnsafeCell},
    slot::{self, Slot},
    spin::Lazy,
    util::fmt,
};
use core::{
    future::Future,
    ops::{Deref, DerefMut},
    pin::Pin,
    task::{ready, Context, Poll},
};
use pin_project::pin_project;

#[cfg(test)]
mod tests;

/// A raw [mutual exclusion lock][mutex] whose acquisition can be cancelled.
///
/// A `CancelMutex` protects no data of its own: it is a lock, and nothing
/// else. Most code will want the [`Mutex`] type, which pairs a `CancelMutex`
/// with the data it protects and hands out RAII guards. `CancelMutex` is the
/// primitive underneath, for code that needs to manage the lock state by
/// hand, or that is written against a conventional lock/unlock interface
/// (see the [`lock_api::RawMutex`] implementation, with the `lock_api`
/// feature flag).
///
/// # Acquiring the Lock
///
/// The lock can be acquired in four ways:
///
/// - [`acquire`] blocks the calling thread until the lock is acquired.
/// - [`try_acquire`] acquires the lock if that can be done without waiting,
///   and returns `false` otherwise.
/// - [`acquire_cancellable`] races the acquisition against a *cancellation
///   signal*, which may be any [`Future`]. Exactly one of the two wins: either
///   the lock is acquired, or the signal's output is returned in a
///   [`Cancelled`] error and the lock is *not* held.
/// - [`wait_endpoint`] returns the acquisition itself as a [`Future`],
///   without waiting on it, so that it can be used as one arm of a
///   `select!` alongside timers, channels, other locks, and so on. If the
///   `Acquire` arm completes, the lock is held. If another arm completes
///   first and the `Acquire` future is dropped, it is not.
///
/// Any of them may be mixed freely with the others on the same mutex.
///
/// Once acquired, the lock is released by calling [`release`]. Releasing a
/// mutex that is not locked is a bug, and [`release`] panics rather than
/// ignoring it.
///
/// # Fairness
///
/// This mutex is **not** fair. Releasing the lock wakes one waiter, but the
/// lock is not handed to it: a concurrent [`try_acquire`] (or a newly
/// arriving acquirer) may take the lock first, in which case the woken waiter
/// goes back to waiting. Under heavy contention, a particular waiter may
/// starve.
///
/// # Reentrancy
///
/// The mutex is not reentrant. Acquiring it while already holding it
/// deadlocks ([`acquire`], [`wait_endpoint`]), returns `false`
/// ([`try_acquire`]), or waits until the signal fires
/// ([`acquire_cancellable`]).
///
/// # Initialization
///
/// A `CancelMutex` may be constructed in a `static` initializer, or by
/// [`Default`]. The state backing it is created lazily, exactly once, by
/// whichever operation touches the mutex first, even when several threads
/// race to do so.
///
/// [mutex]: https://en.wikipedia.org/wiki/Mutual_exclusion
/// [`acquire`]: Self::acquire
/// [`try_acquire`]: Self::try_acquire
/// [`acquire_cancellable`]: Self::acquire_cancellable
/// [`wait_endpoint`]: Self::wait_endpoint
/// [`release`]: Self::release
/// [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
pub struct CancelMutex {
    slot: Lazy<Slot>,
}

/// A [`Future`] that acquires a [`CancelMutex`].
///
/// This is the mutex's *wait endpoint*, returned by
/// [`CancelMutex::wait_endpoint`]. When it completes, the lock is held, and
/// must eventually be released with [`CancelMutex::release`]. Dropping it
/// before it completes cancels the acquisition without acquiring the lock.
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Acquire<'a> {
    #[pin]
    insert: slot::Insert<'a>,
}

/// A [`Mutex`] that protects data of type `T`, and whose acquisition can be
/// cancelled.
///
/// The data can only be accessed through the [RAII guards] returned from
/// [`lock`], [`lock_blocking`], [`try_lock`], [`lock_cancellable`], and
/// [`lock_timeout`], which guarantees that the data is only ever accessed
/// while the mutex is locked.
///
/// This type is a thin wrapper around [`CancelMutex`]; see its documentation
/// for details on fairness, reentrancy, and initialization.
///
/// This mutex does not implement [poisoning].
///
/// [RAII guards]: MutexGuard
/// [`lock`]: Self::lock
/// [`lock_blocking`]: Self::lock_blocking
/// [`try_lock`]: Self::try_lock
/// [`lock_cancellable`]: Self::lock_cancellable
/// [`lock_timeout`]: Self::lock_timeout
/// [poisoning]: https://doc.rust-lang.org/stable/std/sync/struct.Mutex.html#poisoning
pub struct Mutex<T: ?Sized> {
    raw: CancelMutex,
    data: UnsafeCell<T>,
}

/// An [RAII] implementation of a "scoped lock" of a [`Mutex`]. When this
/// structure is dropped (falls out of scope), the lock will be released.
///
/// The data protected by the mutex can be accessed through this guard via its
/// [`Deref`](#impl-Deref) and [`DerefMut`](#impl-DerefMut) implementations.
///
/// The lock does not belong to a particular thread, so this guard may be
/// sent to, and dropped on, a different thread than the one that acquired
/// it.
///
/// [RAII]: https://rust-unofficial.github.io/patterns/patterns/behavioural/RAII.html
#[must_use = "if unused, the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    /// /!\ WARNING: semi-load-bearing drop order /!\
    ///
    /// This struct's field ordering is important.
    data: MutPtr<T>,
    _release: ReleaseOnDrop<'a, T>,
}

/// A [future] returned by the [`Mutex::lock`] method.
///
/// [future]: core::future::Future
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Lock<'a, T: ?Sized> {
    #[pin]
    acquire: Acquire<'a>,
    mutex: &'a Mutex<T>,
}

/// This is used in order to ensure that the release is performed only *after*
/// the data ptr is dropped, in order to keep `loom` happy.
struct ReleaseOnDrop<'a, T: ?Sized>(&'a Mutex<T>);

// === impl CancelMutex ===

impl CancelMutex {
    loom_const_fn! {
        /// Returns a new, unlocked `CancelMutex`.
        ///
        /// # Examples
        ///
        /// ```
        /// use cancel_mutex::CancelMutex;
        ///
        /// let mutex = CancelMutex::new();
        /// assert!(!mutex.is_locked());
        /// ```
        ///
        /// As this is a `const fn`, it may be used in a `static` initializer:
        /// ```
        /// use cancel_mutex::CancelMutex;
        ///
        /// static LOCK: CancelMutex = CancelMutex::new();
        /// ```
        #[must_use]
        pub fn new() -> Self {
            Self {
                slot: Lazy::new(Slot::new as fn() -> Slot),
            }
        }
    }

    /// Acquires the lock, blocking the current thread until it is available.
    ///
    /// When this returns, the calling thread holds the lock.
    ///
    /// With the `std` feature flag enabled, a waiting thread is parked until
    /// the lock is released. Without it, this spins with exponential backoff,
    /// retrying [`try_acquire`](Self::try_acquire).
    ///
    /// Calling this while already holding the lock deadlocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::CancelMutex;
    ///
    /// let mutex = CancelMutex::new();
    /// mutex.acquire();
    /// assert!(mutex.is_locked());
    /// mutex.release();
    /// ```
    pub fn acquire(&self) {
        enter_test_debug_span!("CancelMutex::acquire", mutex = ?fmt::ptr(self));

        #[cfg(loom)]
        crate::loom::future::block_on(self.wait_endpoint());

        #[cfg(all(feature = "std", not(loom)))]
        crate::blocking::block_on(self.wait_endpoint());

        #[cfg(all(not(feature = "std"), not(loom)))]
        {
            let mut backoff = crate::util::Backoff::new();
            while !self.try_acquire() {
                backoff.spin();
            }
        }
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// # Returns
    ///
    /// - `true` if the lock was acquired. The caller now holds it, and must
    ///   release it with [`release`](Self::release).
    /// - `false` if the mutex is locked. Nothing was changed.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::CancelMutex;
    ///
    /// let mutex = CancelMutex::new();
    /// assert!(mutex.try_acquire());
    /// assert!(!mutex.try_acquire());
    ///
    /// mutex.release();
    /// assert!(mutex.try_acquire());
    /// # mutex.release();
    /// ```
    #[inline]
    #[must_use = "if this returns `true`, the lock must be released"]
    pub fn try_acquire(&self) -> bool {
        self.slot.get().try_insert()
    }

    /// Acquires the lock, unless `signal` completes first.
    ///
    /// The cancellation signal may be any [`Future`]: a timer, a oneshot
    /// channel, a cancellation token, and so on. Its output is the reason
    /// for the cancellation.
    ///
    /// # Returns
    ///
    /// The returned [`AcquireCancellable`] future completes with:
    ///
    /// - `Ok(())` if the lock was acquired. The caller now holds it, and
    ///   must release it with [`release`](Self::release).
    /// - `Err(`[`Cancelled`]`)` carrying the signal's output, if `signal`
    ///   completed first. The lock is **not** held, and was never acquired by
    ///   this call.
    ///
    /// Exactly one of the two happens. If the lock can be acquired and the
    /// signal has completed by the same poll, acquisition wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::CancelMutex;
    /// use core::future::{pending, ready};
    ///
    /// # tokio_test::block_on(async {
    /// let mutex = CancelMutex::new();
    ///
    /// // the mutex is unlocked, so this acquires it...
    /// mutex.acquire_cancellable(pending::<()>()).await.unwrap();
    ///
    /// // ...and now that it's locked, an already-fired signal cancels the
    /// // second acquisition.
    /// let err = mutex.acquire_cancellable(ready("shutting down")).await.unwrap_err();
    /// assert_eq!(err.into_reason(), "shutting down");
    ///
    /// assert!(mutex.is_locked());
    /// mutex.release();
    /// # });
    /// ```
    pub fn acquire_cancellable<F: Future>(&self, signal: F) -> AcquireCancellable<'_, F> {
        AcquireCancellable::new(self.wait_endpoint(), signal)
    }

    /// Returns a [`Future`] that acquires the lock, without starting to wait
    /// for it.
    ///
    /// The returned [`Acquire`] future is meant to be used as one arm of a
    /// multi-way wait, such as [`tokio::select!`] or
    /// [`futures::select_biased!`], alongside other events. If the `Acquire`
    /// arm completes, the lock is held and must be released. If a different
    /// arm completes, the `Acquire` future is dropped and the lock is not
    /// held.
    ///
    /// Waiting on this future while the current task already holds the lock
    /// never completes.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::CancelMutex;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mutex = CancelMutex::new();
    /// assert!(mutex.try_acquire());
    ///
    /// tokio::select! {
    ///     _ = mutex.wait_endpoint() => unreachable!("the lock is already held"),
    ///     _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    /// }
    ///
    /// mutex.release();
    ///
    /// tokio::select! {
    ///     _ = mutex.wait_endpoint() => {}
    ///     _ = tokio::time::sleep(Duration::from_secs(10)) => unreachable!("the lock was released"),
    /// }
    /// assert!(mutex.is_locked());
    /// # mutex.release();
    /// # }
    /// ```
    ///
    /// [`tokio::select!`]: https://docs.rs/tokio/latest/tokio/macro.select.html
    /// [`futures::select_biased!`]: https://docs.rs/futures/latest/futures/macro.select_biased.html
    pub fn wait_endpoint(&self) -> Acquire<'_> {
        Acquire {
            insert: self.slot.get().insert(),
        }
    }

    /// Releases the lock.
    ///
    /// If any threads or tasks are waiting to acquire the lock, one of them
    /// is woken.
    ///
    /// # Panics
    ///
    /// If the mutex is not locked. Releasing an unlocked mutex means that two
    /// parties believed they held the lock, or that one released it twice;
    /// either way, continuing is not safe.
    ///
    /// ```should_panic
    /// use cancel_mutex::CancelMutex;
    ///
    /// let mutex = CancelMutex::new();
    /// mutex.release(); // panics!
    /// ```
    #[track_caller]
    pub fn release(&self) {
        if !self.slot.get().remove() {
            panic!("unlock of unlocked mutex");
        }
    }

    /// Returns `true` if the mutex is locked at the instant this is called.
    ///
    /// This is a diagnostic. The load does not synchronize with anything,
    /// and the answer may be stale before the caller looks at it: another
    /// thread may acquire or release the lock at any time. **Never** use it
    /// to decide whether to acquire or release the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.slot.get().is_occupied()
    }
}

feature! {
    #![all(feature = "std", not(loom))]

    use crate::cancel::TimedOut;
    use std::time::{Duration, Instant};

    impl CancelMutex {
        /// Acquires the lock, blocking the current thread for at most
        /// `timeout`.
        ///
        /// This is [`acquire_cancellable`](Self::acquire_cancellable) with a
        /// deadline as its cancellation signal, driven on the current thread.
        ///
        /// # Returns
        ///
        /// - `Ok(())` if the lock was acquired within `timeout`.
        /// - `Err(`[`Cancelled`]`<`[`TimedOut`]`>)` if it was not. The lock is
        ///   **not** held.
        ///
        /// A zero `timeout` makes a single attempt.
        ///
        /// # Examples
        ///
        /// ```
        /// use cancel_mutex::CancelMutex;
        /// use std::time::Duration;
        ///
        /// let mutex = CancelMutex::new();
        /// mutex.acquire();
        ///
        /// assert!(mutex.acquire_timeout(Duration::from_millis(10)).is_err());
        /// # mutex.release();
        /// ```
        pub fn acquire_timeout(&self, timeout: Duration) -> Result<(), Cancelled<TimedOut>> {
            enter_test_debug_span!("CancelMutex::acquire_timeout", mutex = ?fmt::ptr(self), ?timeout);
            let Some(deadline) = Instant::now().checked_add(timeout) else {
                // a deadline this far out never elapses.
                self.acquire();
                return Ok(());
            };

            crate::blocking::block_on_deadline(self.wait_endpoint(), deadline)
                .ok_or(Cancelled::new(TimedOut::new()))
        }
    }

    impl<T: ?Sized> Mutex<T> {
        /// Locks this mutex, blocking the current thread for at most
        /// `timeout`.
        ///
        /// # Returns
        ///
        /// - `Ok(`[`MutexGuard`]`)` if the lock was acquired within `timeout`.
        /// - `Err(`[`Cancelled`]`<`[`TimedOut`]`>)` if it was not.
        ///
        /// # Examples
        ///
        /// ```
        /// use cancel_mutex::Mutex;
        /// use std::time::Duration;
        ///
        /// let mutex = Mutex::new(1);
        /// let guard = mutex.lock_timeout(Duration::from_secs(1)).unwrap();
        /// assert_eq!(*guard, 1);
        ///
        /// assert!(mutex.lock_timeout(Duration::from_millis(1)).is_err());
        /// ```
        pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_, T>, Cancelled<TimedOut>> {
            self.raw.acquire_timeout(timeout)?;
            Ok(unsafe {
                // safety: we have just acquired the lock
                self.guard()
            })
        }
    }
}

impl Default for CancelMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelMutex")
            .field("slot", &self.slot)
            .finish()
    }
}

feature! {
    #![all(feature = "lock_api", not(loom))]

    unsafe impl lock_api::RawMutex for CancelMutex {
        #[allow(clippy::declare_interior_mutable_const)]
        const INIT: Self = Self::new();

        // the lock is not owned by a thread, so it may be released from
        // anywhere.
        type GuardMarker = lock_api::GuardSend;

        #[inline]
        fn lock(&self) {
            self.acquire();
        }

        #[inline]
        fn try_lock(&self) -> bool {
            self.try_acquire()
        }

        #[inline]
        unsafe fn unlock(&self) {
            self.release();
        }

        #[inline]
        fn is_locked(&self) -> bool {
            CancelMutex::is_locked(self)
        }
    }

    /// A [`lock_api::Mutex`] backed by a [`CancelMutex`].
    ///
    /// This is a drop-in replacement for code written against the
    /// [`lock_api`] interface. The underlying [`CancelMutex`] is reachable
    /// through [`lock_api::Mutex::raw`], for cancellable acquisition.
    ///
    /// [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
    /// [`lock_api`]: https://docs.rs/lock_api
    /// [`lock_api::Mutex::raw`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html#method.raw
    pub type BlockingMutex<T> = lock_api::Mutex<CancelMutex, T>;

    /// A [`lock_api::MutexGuard`] for a [`BlockingMutex`].
    ///
    /// [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
    pub type BlockingMutexGuard<'a, T> = lock_api::MutexGuard<'a, CancelMutex, T>;
}

// === impl Acquire ===

impl Future for Acquire<'_> {
    type Output = ();

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = self.project().insert.poll(cx);
        if poll.is_ready() {
            trace!("Acquire::poll: acquired");
        }
        poll
    }
}

// === impl Mutex ===

impl<T> Mutex<T> {
    loom_const_fn! {
        /// Returns a new, unlocked `Mutex` protecting the provided `data`.
        ///
        /// # Examples
        ///
        /// ```
        /// use cancel_mutex::Mutex;
        ///
        /// let lock = Mutex::new(42);
        /// ```
        ///
        /// As this is a `const fn`, it may be used in a `static` initializer:
        /// ```
        /// use cancel_mutex::Mutex;
        ///
        /// static GLOBAL_LOCK: Mutex<usize> = Mutex::new(42);
        /// ```
        #[must_use]
        pub fn new(data: T) -> Self {
            Self {
                raw: CancelMutex::new(),
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Consumes this `Mutex`, returning the protected data.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Locks this mutex.
    ///
    /// This returns a [`Lock`] future that will wait until no other thread or
    /// task holds the lock. When the lock has been acquired, this future
    /// will return a [`MutexGuard`].
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::Mutex;
    ///
    /// async fn example() {
    ///     let mutex = Mutex::new(1);
    ///
    ///     let mut guard = mutex.lock().await;
    ///     *guard = 2;
    /// }
    /// ```
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            acquire: self.raw.wait_endpoint(),
            mutex: self,
        }
    }

    /// Locks this mutex, blocking the current thread until it is available.
    ///
    /// See [`CancelMutex::acquire`].
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::Mutex;
    ///
    /// let mutex = Mutex::new(1);
    /// *mutex.lock_blocking() += 1;
    /// assert_eq!(mutex.into_inner(), 2);
    /// ```
    pub fn lock_blocking(&self) -> MutexGuard<'_, T> {
        self.raw.acquire();
        unsafe {
            // safety: we have just acquired the lock
            self.guard()
        }
    }

    /// Attempts to lock the mutex without waiting, returning `None` if the
    /// mutex is already locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::Mutex;
    ///
    /// let mutex = Mutex::new(1);
    ///
    /// let guard = mutex.try_lock().unwrap();
    /// assert_eq!(*guard, 1);
    /// assert!(mutex.try_lock().is_none());
    /// ```
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if !self.raw.try_acquire() {
            return None;
        }

        Some(unsafe {
            // safety: we have just acquired the lock
            self.guard()
        })
    }

    /// Locks this mutex, unless `signal` completes first.
    ///
    /// See [`CancelMutex::acquire_cancellable`].
    ///
    /// # Returns
    ///
    /// - `Ok(`[`MutexGuard`]`)` if the lock was acquired.
    /// - `Err(`[`Cancelled`]`)` carrying the signal's output, if `signal`
    ///   completed first.
    ///
    /// # Examples
    ///
    /// ```
    /// use cancel_mutex::Mutex;
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mutex = Mutex::new(1);
    /// let _guard = mutex.lock().await;
    ///
    /// let (cancel, cancelled) = oneshot::channel::<&str>();
    /// cancel.send("no longer needed").unwrap();
    ///
    /// let err = mutex.lock_cancellable(cancelled).await.unwrap_err();
    /// assert_eq!(err.into_reason(), Ok("no longer needed"));
    /// # }
    /// ```
    pub async fn lock_cancellable<F: Future>(
        &self,
        signal: F,
    ) -> Result<MutexGuard<'_, T>, Cancelled<F::Output>> {
        self.raw.acquire_cancellable(signal).await?;
        Ok(unsafe {
            // safety: we have just acquired the lock
            self.guard()
        })
    }

    /// Returns `true` if the mutex is locked at the instant this is called.
    ///
    /// See [`CancelMutex::is_locked`] for why this is only a diagnostic.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a mutable reference to the protected data.
    ///
    /// Since this borrows the `Mutex` mutably, no locking is needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.with_mut(|data| unsafe {
            // safety: we have exclusive access to the mutex.
            &mut *data
        })
    }

    /// Returns the underlying [`CancelMutex`].
    ///
    /// # Safety
    ///
    /// Releasing the raw mutex while a [`MutexGuard`] exists allows the data
    /// to be accessed concurrently.
    #[must_use]
    pub unsafe fn raw(&self) -> &CancelMutex {
        &self.raw
    }

    /// Constructs a new `MutexGuard` for this `Mutex`.
    ///
    /// # Safety
    ///
    /// This may only be called once a lock has been acquired.
    unsafe fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            _release: ReleaseOnDrop(self),
            data: self.data.get_mut(),
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("data", &fmt::opt(&self.try_lock()).or_else("<locked>"))
            .finish()
    }
}

unsafe impl<T: ?Sized> Send for Mutex<T> where T: Send {}
unsafe impl<T: ?Sized> Sync for Mutex<T> where T: Send {}

// === impl Lock ===

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        ready!(this.acquire.poll(cx));

        let guard = unsafe {
            // safety: we have just acquired the lock.
            this.mutex.guard()
        };
        Poll::Ready(guard)
    }
}

// === impl MutexGuard ===

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe {
            // safety: we are holding the lock
            &*self.data.deref()
        }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe {
            // safety: we are holding the lock
            self.data.deref()
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

unsafe impl<T: ?Sized> Send for MutexGuard<'_, T> where T: Send {}
unsafe impl<T: ?Sized> Sync for MutexGuard<'_, T> where T: Send + Sync {}

impl<T: ?Sized> Drop for ReleaseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.raw.release()
    }
}
