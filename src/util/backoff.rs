/// An [exponential backoff] for spin loops.
///
/// The mutex uses this when it has to wait without parking a thread: while
/// another thread finishes lazily initializing the slot, while contending for
/// the waiter list's spinlock, and (without the `std` feature) while blocking
/// in [`CancelMutex::acquire`].
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
/// [`CancelMutex::acquire`]: crate::CancelMutex::acquire
#[derive(Debug, Copy, Clone)]
pub struct Backoff {
    exp: u8,
}

// === impl Backoff ===

impl Backoff {
    /// The maximum exponent (2^8).
    pub const MAX_EXPONENT: u8 = 8;

    /// Returns a new exponential backoff, starting at a single spin.
    #[must_use]
    pub const fn new() -> Self {
        Self { exp: 0 }
    }

    /// Backs off in a spin loop.
    ///
    /// Each call issues `2^exp` [spin loop hints], where `exp` starts at 0 and
    /// is incremented after every call until it reaches
    /// [`Self::MAX_EXPONENT`].
    ///
    /// [spin loop hints]: core::hint::spin_loop
    #[inline(always)]
    pub fn spin(&mut self) {
        #[cfg_attr(loom, allow(unused_variables))]
        let spins = 1 << self.exp;

        #[cfg(not(loom))]
        for _ in 0..spins {
            crate::loom::hint::spin_loop();
        }

        #[cfg(loom)]
        {
            test_debug!("would back off for {spins} spins");
            loom::thread::yield_now();
        }

        if self.exp < Self::MAX_EXPONENT {
            self.exp += 1
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
