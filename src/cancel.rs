//! Cancelling a pending acquisition.
//!
//! Any [`Future`] can act as a cancellation signal: a timer, the receiving
//! half of a oneshot channel, a cancellation token's `cancelled()` future,
//! and so on. Its output is the *reason* for the cancellation, and is handed
//! back to the caller inside a [`Cancelled`] error.
//!
//! See [`CancelMutex::acquire_cancellable`] for details.
//!
//! [`CancelMutex::acquire_cancellable`]: crate::CancelMutex::acquire_cancellable
use crate::mutex::Acquire;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use pin_project::pin_project;

/// An acquisition was cancelled before the lock was acquired.
///
/// When this error is returned, the caller does **not** hold the lock. It
/// carries the output of the cancellation signal that fired, which can be
/// recovered with [`reason`] or [`into_reason`].
///
/// [`reason`]: Self::reason
/// [`into_reason`]: Self::into_reason
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("lock acquisition cancelled: {reason}")]
pub struct Cancelled<E> {
    reason: E,
}

/// The reason a `*_timeout` acquisition was cancelled: its deadline elapsed
/// before the lock became available.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, thiserror::Error)]
#[error("deadline elapsed")]
pub struct TimedOut {
    _p: (),
}

/// A [`Future`] returned by [`CancelMutex::acquire_cancellable`].
///
/// Resolves to `Ok(())` with the lock held, or to `Err(`[`Cancelled`]`)`
/// without it, whichever happens first. When both the lock and the signal
/// are ready in the same poll, the lock wins.
///
/// # Panics
///
/// Polling this future again after it has completed panics.
///
/// [`CancelMutex::acquire_cancellable`]: crate::CancelMutex::acquire_cancellable
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct AcquireCancellable<'a, F> {
    /// `None` once the race has been decided.
    #[pin]
    acquire: Option<Acquire<'a>>,

    #[pin]
    signal: F,
}

// === impl Cancelled ===

impl<E> Cancelled<E> {
    pub(crate) const fn new(reason: E) -> Self {
        Self { reason }
    }

    /// Borrows the output of the cancellation signal.
    #[must_use]
    pub fn reason(&self) -> &E {
        &self.reason
    }

    /// Returns the output of the cancellation signal.
    #[must_use]
    pub fn into_reason(self) -> E {
        self.reason
    }
}

// === impl TimedOut ===

impl TimedOut {
    #[cfg(all(feature = "std", not(loom)))]
    pub(crate) const fn new() -> Self {
        Self { _p: () }
    }
}

// === impl AcquireCancellable ===

impl<'a, F> AcquireCancellable<'a, F> {
    pub(crate) fn new(acquire: Acquire<'a>, signal: F) -> Self {
        Self {
            acquire: Some(acquire),
            signal,
        }
    }
}

impl<F: Future> Future for AcquireCancellable<'_, F> {
    type Output = Result<(), Cancelled<F::Output>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        let acquire = this
            .acquire
            .as_mut()
            .as_pin_mut()
            .expect("`AcquireCancellable` polled after completion");

        if acquire.poll(cx).is_ready() {
            this.acquire.set(None);
            return Poll::Ready(Ok(()));
        }

        match this.signal.poll(cx) {
            Poll::Ready(reason) => {
                trace!("AcquireCancellable::poll: cancelled");
                // drop the pending acquisition now, rather than whenever this
                // future is dropped, so that a wakeup it may have been given
                // is passed on immediately.
                this.acquire.set(None);
                Poll::Ready(Err(Cancelled::new(reason)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
