#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
pub mod util;

pub mod cancel;
pub mod mutex;

mod blocking;
mod slot;
mod spin;

#[doc(inline)]
pub use self::cancel::{Cancelled, TimedOut};
#[doc(inline)]
pub use self::mutex::{Acquire, CancelMutex, Lock, Mutex, MutexGuard};
#[cfg(all(feature = "lock_api", not(loom)))]
#[doc(inline)]
pub use self::mutex::{BlockingMutex, BlockingMutexGuard};
