//! The capacity-one slot that backs a [`CancelMutex`].
//!
//! A slot either holds the token (it is *occupied*, and the mutex is locked)
//! or it is empty. Inserting the token is how a lock is acquired, and
//! removing it is how a lock is released. Those are the only two state
//! transitions.
//!
//! # Implementation Notes
//!
//! Occupancy is a single bit in an atomic state word, so an uncontended
//! insert or remove is one read-modify-write. Contended inserts are
//! represented by [`Insert`] futures, which link a waiter node into an
//! [intrusive] list protected by a spinlock. A second bit in the state word,
//! `WAITING`, mirrors whether that list is non-empty. It is only ever
//! changed while the list is locked, and an inserter always sets it *before*
//! its final attempt to take the token, so a remover either observes the bit
//! and wakes someone, or the inserter observes the empty slot. There is no
//! window in which a wakeup can be lost.
//!
//! Removing the token wakes at most one waiter. The woken waiter is not
//! handed the token; it retries the insert when it is next polled, and may
//! lose that race to a barging `try_insert`, in which case it simply queues
//! again. If a woken waiter is dropped before it retries, it passes the
//! wakeup on to the next waiter instead.
//!
//! [`CancelMutex`]: crate::CancelMutex
//! [intrusive]: https://fuchsia.dev/fuchsia-src/development/languages/c-cpp/fbl_containers_guide/introduction
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::{
            atomic::{AtomicUsize, Ordering::*},
            blocking::Mutex,
        },
    },
    util::fmt,
};
use cordyceps::{
    list::{self, List},
    Linked,
};
use core::{
    future::Future,
    marker::PhantomPinned,
    mem, ops,
    pin::Pin,
    ptr::{self, NonNull},
    task::{Context, Poll, Waker},
};
use pin_project::{pin_project, pinned_drop};


pub(crate) struct Slot {
    state: AtomicUsize,

    /// Inserters waiting for the token to be removed.
    ///
    /// # Safety
    ///
    /// The lock *must* be held when manipulating the list, OR when
    /// manipulating waiter nodes that may be linked into the list. A node
    /// that is known not to be linked may be touched by its owning [`Insert`]
    /// future without the lock.
    waiters: Mutex<List<Waiter>>,
}

/// Future returned by [`Slot::insert`].
///
/// Completes once this future has put the token in the slot. Dropping it
/// before then leaves the slot untouched.
#[derive(Debug)]
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub(crate) struct Insert<'a> {
    slot: &'a Slot,

    #[pin]
    waiter: Waiter,
}

/// A waiter node which may be linked into the slot's wait list.
#[derive(Debug)]
#[repr(C)]
#[pin_project]
struct Waiter {
    /// The intrusive linked list node.
    ///
    /// This *must* be the first field in the struct in order for the `Linked`
    /// implementation to be sound.
    #[pin]
    node: UnsafeCell<Node>,

    /// Only ever touched by the owning `Insert` future.
    state: WaitState,
}

#[derive(Debug)]
struct Node {
    links: list::Links<Waiter>,

    /// Written by the remover that pops this node, under the list lock.
    wakeup: Wakeup,

    // This type is !Unpin due to the heuristic from:
    // <https://github.com/rust-lang/rust/pull/82834>
    _pin: PhantomPinned,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum WaitState {
    /// Not in the list. The next poll attempts to insert.
    Idle,

    /// Linked into the list, or popped from it by a remover that has not yet
    /// been observed.
    Queued,

    /// The token was inserted by this future. Terminal: polling again
    /// panics rather than reporting a second insertion.
    Inserted,
}

#[derive(Debug)]
enum Wakeup {
    Empty,
    Waiting(Waker),
    /// Popped from the list by a remover. The node is no longer linked.
    Removed,
}

#[derive(Eq, PartialEq, Copy, Clone)]
struct State(usize);

// === impl Slot ===

impl Slot {
    loom_const_fn! {
        #[must_use]
        pub(crate) fn new() -> Self {
            Self {
                state: AtomicUsize::new(State::EMPTY.0),
                waiters: Mutex::new(List::new()),
            }
        }
    }

    /// Returns a future that inserts the token, waiting for the slot to be
    /// emptied if it is currently occupied.
    pub(crate) fn insert(&self) -> Insert<'_> {
        Insert {
            slot: self,
            waiter: Waiter {
                node: UnsafeCell::new(Node {
                    links: list::Links::new(),
                    wakeup: Wakeup::Empty,
                    _pin: PhantomPinned,
                }),
                state: WaitState::Idle,
            },
        }
    }

    /// Inserts the token if the slot is empty. Returns `false`, without
    /// changing anything, if it is occupied.
    #[cfg_attr(test, track_caller)]
    pub(crate) fn try_insert(&self) -> bool {
        let prev = self.fetch_or(State::OCCUPIED);
        let inserted = !prev.contains(State::OCCUPIED);
        trace!(slot = ?fmt::ptr(self), ?prev, inserted, "Slot::try_insert");
        inserted
    }

    /// Removes the token, waking one waiting inserter if there are any.
    ///
    /// Returns `false` if the slot was already empty.
    #[cfg_attr(test, track_caller)]
    pub(crate) fn remove(&self) -> bool {
        let prev = self.fetch_and(!State::OCCUPIED);
        trace!(slot = ?fmt::ptr(self), ?prev, "Slot::remove");
        if !prev.contains(State::OCCUPIED) {
            return false;
        }

        if prev.contains(State::WAITING) {
            self.wake_one();
        }

        true
    }

    /// Returns `true` if the token is in the slot at the instant of the
    /// load. The answer may be stale by the time the caller looks at it.
    #[inline]
    pub(crate) fn is_occupied(&self) -> bool {
        State(self.state.load(Relaxed)).contains(State::OCCUPIED)
    }

    #[cold]
    #[inline(never)]
    fn wake_one(&self) {
        let waker = self.waiters.with_lock(|waiters| {
            let node = waiters.pop_back()?;
            if waiters.is_empty() {
                self.fetch_and(!State::WAITING);
            }
            Some(Waiter::notify(node, waiters))
        });

        if let Some(waker) = waker {
            test_debug!(slot = ?fmt::ptr(self), "Slot::wake_one: waking inserter");
            waker.wake();
        }
    }

    #[cfg_attr(test, track_caller)]
    fn fetch_or(&self, State(bits): State) -> State {
        #[allow(clippy::let_and_return)]
        let prev = State(self.state.fetch_or(bits, SeqCst));
        test_debug!("state.fetch_or({:?}) = {prev:?}", State(bits));
        prev
    }

    #[cfg_attr(test, track_caller)]
    fn fetch_and(&self, State(bits): State) -> State {
        #[allow(clippy::let_and_return)]
        let prev = State(self.state.fetch_and(bits, SeqCst));
        test_debug!("state.fetch_and({:#b}) = {prev:?}", bits);
        prev
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("state", &State(self.state.load(Relaxed)))
            .field("waiters", &self.waiters)
            .finish()
    }
}

// Safety: the wait list is only accessed with its lock held, and the nodes it
// points to are pinned `Insert` futures that unlink themselves on drop.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

// === impl Waiter ===

impl Waiter {
    /// Marks a node just popped from `list` as removed, returning its waker.
    ///
    /// # Safety
    ///
    /// This is only safe to call while the list is locked. The `list`
    /// parameter ensures this method is only called while holding the lock, so
    /// this can be safe.
    ///
    /// Of course, that must be the *same* list that this waiter was a member
    /// of, and currently, there is no way to ensure that...
    #[inline(always)]
    #[cfg_attr(loom, track_caller)]
    fn notify(this: NonNull<Self>, list: &mut List<Self>) -> Waker {
        Waiter::with_node(this, list, |node| {
            match mem::replace(&mut node.wakeup, Wakeup::Removed) {
                Wakeup::Waiting(waker) => waker,
                // every node is linked with a waker, and is unlinked before
                // its wakeup can be overwritten again.
                wakeup => unreachable!("tried to wake a waiter in the {:?} state!", wakeup),
            }
        })
    }

    /// # Safety
    ///
    /// This is only safe to call while the list is locked. The dummy `_list`
    /// parameter ensures this method is only called while holding the lock, so
    /// this can be safe.
    #[inline(always)]
    #[cfg_attr(loom, track_caller)]
    fn with_node<T>(
        mut this: NonNull<Self>,
        _list: &mut List<Self>,
        f: impl FnOnce(&mut Node) -> T,
    ) -> T {
        unsafe {
            // safety: this is only called while holding the lock on the list,
            // so it's safe to mutate the waiter.
            this.as_mut().node.with_mut(|node| f(&mut *node))
        }
    }

    fn poll_insert(mut self: Pin<&mut Self>, slot: &Slot, waker: &Waker) -> Poll<()> {
        test_debug!(ptr = ?fmt::ptr(self.as_mut()), "Waiter::poll_insert");
        let ptr = unsafe { NonNull::from(Pin::into_inner_unchecked(self.as_mut())) };
        let this = self.as_mut().project();

        if *this.state == WaitState::Queued {
            let removed = slot.waiters.with_lock(|waiters| {
                Waiter::with_node(ptr, waiters, |node| match node.wakeup {
                    Wakeup::Waiting(ref mut curr_waker) => {
                        if !curr_waker.will_wake(waker) {
                            *curr_waker = waker.clone();
                        }
                        false
                    }
                    Wakeup::Removed => {
                        node.wakeup = Wakeup::Empty;
                        true
                    }
                    Wakeup::Empty => unreachable!("a queued waiter must have a wakeup"),
                })
            });

            if !removed {
                return Poll::Pending;
            }

            test_debug!("poll_insert: woken, retrying");
            *this.state = WaitState::Idle;
        }

        assert_ne!(
            *this.state,
            WaitState::Inserted,
            "`Insert` polled after completion"
        );

        // fast path: is the slot empty right now?
        if slot.try_insert() {
            *this.state = WaitState::Inserted;
            return Poll::Ready(());
        }

        test_debug!("poll_insert: locking...");
        let node = this.node;
        let state = this.state;
        slot.waiters.with_lock(move |waiters| {
            test_debug!("poll_insert: -> locked");
            // announce ourselves before the final attempt, so that a remover
            // racing with us either sees `WAITING` or leaves the slot empty
            // for us.
            slot.fetch_or(State::WAITING);

            if slot.try_insert() {
                if waiters.is_empty() {
                    slot.fetch_and(!State::WAITING);
                }
                *state = WaitState::Inserted;
                return Poll::Ready(());
            }

            node.with_mut(|node| unsafe {
                // safety: we may mutate the node because we are holding the
                // lock, and it is not yet linked.
                debug_assert!(matches!((*node).wakeup, Wakeup::Empty));
                (*node).wakeup = Wakeup::Waiting(waker.clone());
            });
            *state = WaitState::Queued;
            waiters.push_front(ptr);

            Poll::Pending
        })
    }

    /// Unlinks this waiter if it is still queued.
    ///
    /// If a remover already popped it, the wakeup it was given has not been
    /// used, so it is handed to the next waiter instead.
    fn release(mut self: Pin<&mut Self>, slot: &Slot) {
        let state = *self.as_mut().project().state;
        let ptr = NonNull::from(unsafe { Pin::into_inner_unchecked(self) });
        test_debug!(self = ?fmt::ptr(ptr), ?state, "Waiter::release");

        if state != WaitState::Queued {
            return;
        }

        let was_removed = slot.waiters.with_lock(|waiters| {
            let was_removed =
                Waiter::with_node(ptr, waiters, |node| matches!(node.wakeup, Wakeup::Removed));

            if !was_removed {
                unsafe {
                    // safety: we have the lock on the list, and the node is
                    // linked into it.
                    waiters.remove(ptr);
                }

                if waiters.is_empty() {
                    slot.fetch_and(!State::WAITING);
                }
            }

            was_removed
        });

        if was_removed {
            test_debug!("Waiter::release: passing on an unused wakeup");
            slot.wake_one();
        }
    }
}

unsafe impl Linked<list::Links<Waiter>> for Waiter {
    type Handle = NonNull<Waiter>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        ptr
    }

    unsafe fn links(target: NonNull<Self>) -> NonNull<list::Links<Waiter>> {
        // Safety: using `ptr::addr_of!` avoids creating a temporary
        // reference, which stacked borrows dislikes.
        let node = ptr::addr_of!((*target.as_ptr()).node);
        (*node).with_mut(|node| {
            let links = ptr::addr_of_mut!((*node).links);
            // Safety: since the `target` pointer is `NonNull`, we can assume
            // that pointers to its members are also not null, making this use
            // of `new_unchecked` fine.
            NonNull::new_unchecked(links)
        })
    }
}

// === impl Insert ===

impl Future for Insert<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.waiter.poll_insert(this.slot, cx.waker())
    }
}

#[pinned_drop]
impl PinnedDrop for Insert<'_> {
    fn drop(mut self: Pin<&mut Self>) {
        let this = self.project();
        this.waiter.release(this.slot);
    }
}

// === impl State ===

impl State {
    const EMPTY: Self = Self(0b00);
    const OCCUPIED: Self = Self(0b01);
    const WAITING: Self = Self(0b10);

    fn contains(self, Self(state): Self) -> bool {
        self.0 & state == state
    }
}

impl ops::Not for State {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut has_states = false;

        fmt_bits!(self, f, has_states, OCCUPIED, WAITING);

        if !has_states {
            if *self == Self::EMPTY {
                return f.write_str("EMPTY");
            }

            f.debug_tuple("UnknownState")
                .field(&format_args!("{:#b}", self.0))
                .finish()?;
        }

        Ok(())
    }
}
