//! Spinning synchronization primitives used inside the slot.
//!
//! The [`CancelMutex`](crate::CancelMutex) never spins while waiting for the
//! *lock*; waiting acquirers are queued and woken. Spinning is reserved for
//! the two places where the wait is expected to be a handful of
//! instructions long:
//!
//! - [`Spinlock`]: guards the slot's intrusive list of waiters.
//! - [`Lazy`]: the one-time initialization guard that creates the slot on
//!   first use.
pub(crate) mod once;

pub(crate) use self::once::Lazy;

#[cfg(not(loom))]
use crate::{
    loom::sync::atomic::{AtomicBool, Ordering::*},
    util::Backoff,
};

/// A spinlock protecting a critical section.
///
/// This spins with an exponential backoff while waiting for the lock to
/// become available.
#[cfg(not(loom))]
#[derive(Debug)]
pub(crate) struct Spinlock {
    locked: AtomicBool,
}

// === impl Spinlock ===

#[cfg(not(loom))]
impl Spinlock {
    loom_const_fn! {
        /// Returns a new `Spinlock`, in the unlocked state.
        pub(crate) fn new() -> Self {
            Self { locked: AtomicBool::new(false) }
        }
    }

    #[cfg_attr(test, track_caller)]
    pub(crate) fn lock(&self) {
        let mut boff = Backoff::default();
        while test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_err())
        {
            while test_dbg!(self.is_locked()) {
                boff.spin();
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    pub(crate) fn try_lock(&self) -> bool {
        test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_ok())
    }

    /// # Safety
    ///
    /// The caller must currently hold the lock, by a prior successful call to
    /// [`lock`](Self::lock) or [`try_lock`](Self::try_lock).
    #[cfg_attr(test, track_caller)]
    #[inline]
    pub(crate) unsafe fn unlock(&self) {
        test_dbg!(self.locked.store(false, Release));
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}
