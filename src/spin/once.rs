//! A cell which is lazily initialized, exactly once, the first time it is
//! accessed.
use crate::{
    loom::sync::atomic::{AtomicU8, Ordering},
    util::Backoff,
};
use core::{any, cell::UnsafeCell, fmt, mem::MaybeUninit};

/// A cell which will be lazily initialized by the provided function the first
/// time it is accessed.
///
/// Any number of threads may race to access a `Lazy` for the first time. One
/// of them runs the initializer, and the others spin until it has finished;
/// the initializer runs at most once per cell.
pub(crate) struct Lazy<T, F = fn() -> T> {
    value: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
    initializer: F,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;

// === impl Lazy ===

impl<T, F> Lazy<T, F> {
    loom_const_fn! {
        /// Returns a new `Lazy` cell, initialized with the provided `initializer`
        /// function.
        #[must_use]
        pub(crate) fn new(initializer: F) -> Self {
            Self {
                value: UnsafeCell::new(MaybeUninit::uninit()),
                state: AtomicU8::new(UNINITIALIZED),
                initializer,
            }
        }
    }

    /// Returns the value of the lazy cell, if it has already been initialized.
    /// Otherwise, returns `None`.
    #[inline]
    #[must_use]
    pub(crate) fn get_if_present(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == INITIALIZED {
            let value = unsafe {
                // Safety: we just ensured the cell was initialized.
                (*self.value.get()).assume_init_ref()
            };
            Some(value)
        } else {
            None
        }
    }
}

impl<T, F> Lazy<T, F>
where
    F: Fn() -> T,
{
    /// Borrow the value, or initialize it if it has not yet been initialized.
    #[inline]
    #[must_use]
    pub(crate) fn get(&self) -> &T {
        // once initialized, this is a single load.
        if let Some(value) = self.get_if_present() {
            return value;
        }

        self.init();
        unsafe {
            // Safety: we just ensured the cell was initialized.
            (*self.value.get()).assume_init_ref()
        }
    }

    /// Ensure that the cell has been initialized.
    ///
    /// If the cell has yet to be initialized, this initializes it. If it is
    /// currently initializing, this spins until it has been fully initialized.
    /// Otherwise, this returns immediately.
    pub(crate) fn init(&self) {
        let state = self.state.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match state {
            Err(INITIALIZED) => {
                // Already initialized! Just return the value.
            }
            Err(INITIALIZING) => {
                test_trace!("Lazy::init: waiting for another thread to initialize");
                let mut backoff = Backoff::new();
                while self.state.load(Ordering::Acquire) != INITIALIZED {
                    backoff.spin();
                }
            }
            Ok(_) => {
                test_trace!(
                    "type" = any::type_name::<T>(),
                    "Lazy::init: running initializer"
                );
                unsafe {
                    // Safety: we won the race to `INITIALIZING`, so no other
                    // thread will read or write the value until we store
                    // `INITIALIZED`.
                    (*self.value.get()).write((self.initializer)());
                }
                if let Err(actual) = self.state.compare_exchange(
                    INITIALIZING,
                    INITIALIZED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    unreachable!(
                        "Lazy<{}>: state changed while locked. This is a bug! (state={})",
                        any::type_name::<T>(),
                        actual
                    );
                }
            }
            Err(state) => unreachable!(
                "Lazy<{}>: unexpected state {}!. This is a bug!",
                any::type_name::<T>(),
                state
            ),
        };
    }
}

impl<T, F> Drop for Lazy<T, F> {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) == INITIALIZED {
            unsafe {
                // Safety: the cell is initialized, and we have exclusive
                // access to it.
                self.value.get_mut().assume_init_drop();
            }
        }
    }
}

impl<T, F> fmt::Debug for Lazy<T, F>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.load(Ordering::Acquire) {
            INITIALIZED => match self.get_if_present() {
                Some(value) => value.fmt(f),
                None => f.pad("<initialized>"),
            },
            INITIALIZING => f.pad("<initializing>"),
            _ => f.pad("<uninitialized>"),
        }
    }
}

unsafe impl<T: Send, F: Send> Send for Lazy<T, F> {}
unsafe impl<T: Send + Sync, F: Sync> Sync for Lazy<T, F> {}
