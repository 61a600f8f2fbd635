#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code)]
    #![allow(unused_imports)]

    pub(crate) use loom::{cell, future, hint, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;

        pub(crate) mod blocking {
            use core::fmt;

            /// Mock version of the waiter list's spinlock-protected cell,
            /// using `loom::sync::Mutex` so that loom can see (and permute)
            /// lock acquisitions.
            pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

            impl<T> Mutex<T> {
                #[track_caller]
                pub(crate) fn new(t: T) -> Self {
                    Self(loom::sync::Mutex::new(t))
                }

                #[track_caller]
                pub(crate) fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
                    let mut guard = self
                        .0
                        .lock()
                        .expect("loom mutex will never poison");
                    f(&mut *guard)
                }
            }

            impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        }
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]
    pub(crate) mod sync {
        #[cfg(any(feature = "std", test))]
        pub use std::sync::Arc;

        pub(crate) use crate::blocking;

        pub(crate) mod atomic {
            pub use portable_atomic::*;
        }
    }

    pub(crate) use portable_atomic::hint;

    #[cfg(test)]
    pub(crate) mod thread {

        pub(crate) use std::thread::{yield_now, JoinHandle};

        /// Spawns a thread that inherits the current tracing dispatcher and
        /// span, so that test output stays attributed to the test.
        pub(crate) fn spawn<F, T>(f: F) -> JoinHandle<T>
        where
            F: FnOnce() -> T + Send + 'static,
            T: Send + 'static,
        {
            use super::sync::atomic::{AtomicUsize, Ordering::Relaxed};
            thread_local! {
                static CHILDREN: AtomicUsize = const { AtomicUsize::new(1) };
            }

            let subscriber = tracing::Dispatch::default();
            let span = tracing::Span::current();
            let num = CHILDREN.with(|children| children.fetch_add(1, Relaxed));
            std::thread::spawn(move || {
                let _tracing = tracing::dispatcher::set_default(&subscriber);
                let _span = tracing::info_span!(parent: span, "thread", message = num).entered();

                tracing::info!(num, "spawned child thread");
                let res = f();
                tracing::info!(num, "child thread completed");

                res
            })
        }
    }


    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        model::Builder::new().check(f)
    }

    pub(crate) mod cell {
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub const fn new(data: T) -> UnsafeCell<T> {
                UnsafeCell(core::cell::UnsafeCell::new(data))
            }
        }

        impl<T: ?Sized> UnsafeCell<T> {
            #[inline(always)]
            pub fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*const T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn get_mut(&self) -> MutPtr<T> {
                MutPtr(self.0.get())
            }
        }

        impl<T> UnsafeCell<T> {
            #[inline(always)]
            #[must_use]
            pub(crate) fn into_inner(self) -> T {
                self.0.into_inner()
            }
        }

        #[derive(Debug)]
        pub(crate) struct MutPtr<T: ?Sized>(*mut T);

        impl<T: ?Sized> MutPtr<T> {
            // Clippy knows that it's Bad and Wrong to construct a mutable reference
            // from an immutable one...but this function is intended to simulate a raw
            // pointer, so we have to do that here.
            #[allow(clippy::mut_from_ref)]
            #[inline(always)]
            pub(crate) unsafe fn deref(&self) -> &mut T {
                &mut *self.0
            }

            #[inline(always)]
            pub fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0)
            }
        }
    }

}
