//! The shared, refcounted control block backing every [`Strong`](crate::observer::Strong)
//! and [`Weak`](crate::observer::Weak) observer minted by an [`Anchor`](crate::anchor::Anchor).
//!
//! `std::sync::Arc` has neither a custom-deleter constructor nor an aliasing
//! constructor, so the observers in this crate carry their own small
//! hand-rolled strong/weak refcounted block instead of wrapping `Arc`. The
//! strong/weak bookkeeping below follows the same "weak count also tracks
//! the strong side" trick used by several atomic `Arc` sketches in the
//! broader ecosystem: dropping the last `Strong` both runs the deleter and
//! releases one implicit weak reference that stood for "some `Strong`
//! exists".
use std::cell::UnsafeCell;
use std::ptr::NonNull;

use cache_padded::CachePadded;

use crate::sync::{fence, AtomicUsize, Ordering};

/// Runs exactly once, when the strong count reaches zero.
pub(crate) type Deleter = Box<dyn FnOnce() + Send>;

pub(crate) struct ControlBlock {
    /// Cache-padded like the teacher's own hot refcount fields: `strong` is
    /// touched by every `get_strong`/`Strong` clone-or-drop across however
    /// many threads hold observers, so it should not share a cache line
    /// with `weak`, which is comparatively rarely touched.
    strong: CachePadded<AtomicUsize>,
    /// Real `Weak` holders, plus one for as long as `strong > 0`.
    weak: CachePadded<AtomicUsize>,
    deleter: UnsafeCell<Option<Deleter>>,
}

// SAFETY: `deleter` is only ever written once before the block is shared
// (at construction) and taken exactly once, by whichever thread observes
// `strong` drop to zero; `strong`/`weak` are atomics.
unsafe impl Send for ControlBlock {}
unsafe impl Sync for ControlBlock {}

impl ControlBlock {
    /// Allocates a fresh control block with one strong reference and the
    /// implicit weak reference that goes with it.
    pub(crate) fn new(deleter: Deleter) -> NonNull<ControlBlock> {
        let boxed = Box::new(ControlBlock {
            strong: CachePadded::new(AtomicUsize::new(1)),
            weak: CachePadded::new(AtomicUsize::new(1)),
            deleter: UnsafeCell::new(Some(deleter)),
        });
        // SAFETY: Box::leak never returns null.
        unsafe { NonNull::new_unchecked(Box::leak(boxed)) }
    }

    /// # Safety
    /// `this` must point at a control block that is still alive (i.e. some
    /// strong or weak reference to it is held by the caller).
    pub(crate) unsafe fn incr_strong(this: NonNull<ControlBlock>) {
        let cb = unsafe { this.as_ref() };
        let old = cb.strong.fetch_add(1, Ordering::Relaxed);
        if old > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// # Safety
    /// Same as [`Self::incr_strong`].
    pub(crate) unsafe fn decr_strong(this: NonNull<ControlBlock>) {
        let cb = unsafe { this.as_ref() };
        if cb.strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // SAFETY: strong just reached 0, so no other thread can be
            // racing to take the deleter.
            let deleter = unsafe { (*cb.deleter.get()).take() };
            if let Some(run) = deleter {
                run();
            }
            // Release the implicit weak reference that represented "some
            // Strong exists".
            unsafe { Self::decr_weak(this) };
        }
    }

    /// Attempts to upgrade: increments strong iff it is currently nonzero.
    ///
    /// # Safety
    /// Same as [`Self::incr_strong`].
    pub(crate) unsafe fn try_incr_strong(this: NonNull<ControlBlock>) -> bool {
        let cb = unsafe { this.as_ref() };
        let mut n = cb.strong.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            match cb
                .strong
                .compare_exchange_weak(n, n + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(observed) => n = observed,
            }
        }
    }

    /// # Safety
    /// Same as [`Self::incr_strong`].
    pub(crate) unsafe fn incr_weak(this: NonNull<ControlBlock>) {
        let cb = unsafe { this.as_ref() };
        let old = cb.weak.fetch_add(1, Ordering::Relaxed);
        if old > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// # Safety
    /// Same as [`Self::incr_strong`]; additionally, `this` must not be
    /// dereferenced again by the caller after this call if it returns the
    /// deallocating branch (it can't signal that, so callers must not hold
    /// onto `this` past a weak decrement they don't know the outcome of).
    pub(crate) unsafe fn decr_weak(this: NonNull<ControlBlock>) {
        let cb = unsafe { this.as_ref() };
        if cb.weak.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // SAFETY: weak just reached 0; every Strong and Weak referring
            // to this block has been dropped, so nobody else can reach it.
            unsafe {
                drop(Box::from_raw(this.as_ptr()));
            }
        }
    }

    /// # Safety
    /// Same as [`Self::incr_strong`].
    pub(crate) unsafe fn strong_count(this: NonNull<ControlBlock>) -> usize {
        unsafe { this.as_ref() }.strong.load(Ordering::Acquire)
    }
}


/// Exhaustive model-checking of the strong/weak refcount protocol under
/// every interleaving `loom` will explore: two threads race to clone and
/// drop a strong reference while a third drops the original, and the
/// deleter must still run exactly once.
#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::sync::Arc as LoomArc;

    /// `NonNull` isn't `Send`; the control block it points to is, so this
    /// is just a thin carrier to move the pointer into a spawned thread.
    #[derive(Clone, Copy)]
    struct SendPtr(NonNull<ControlBlock>);
    unsafe impl Send for SendPtr {}

    #[test]
    fn deleter_fires_exactly_once_under_all_interleavings() {
        loom::model(|| {
            let ran = LoomArc::new(AtomicUsize::new(0));
            let ran2 = ran.clone();
            let cb = SendPtr(ControlBlock::new(Box::new(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            })));

            unsafe { ControlBlock::incr_strong(cb.0) };

            let t = loom::thread::spawn(move || unsafe {
                ControlBlock::decr_strong(cb.0);
            });
            unsafe { ControlBlock::decr_strong(cb.0) };
            t.join().unwrap();

            assert_eq!(ran.load(Ordering::SeqCst), 1);
        });
    }
}
