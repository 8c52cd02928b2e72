//! [`Anchor`]: a handle that owns a single refcount contribution on a
//! control block but carries no referent pointer of its own. It mints
//! typed [`Strong`]/[`Weak`] observers aliased to whatever pointer the
//! caller supplies.
//!
//! All operations take `&self`: the control-block pointer is stored in an
//! `AtomicPtr`, not a plain field, precisely so that `Barrier` can let
//! `get_strong`/`get_weak` run concurrently with `disarm` on other threads
//! (see the crate's concurrency notes) without a lock.
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::control::{ControlBlock, Deleter};
use crate::observer::{Strong, Weak};

/// Holds zero or one refcount contribution on a [`ControlBlock`].
pub struct Anchor {
    ctrl: AtomicPtr<ControlBlock>,
}

// SAFETY: the only state is an `AtomicPtr` to a `Send + Sync` control
// block; every operation goes through atomic ops on that pointer.
unsafe impl Send for Anchor {}
unsafe impl Sync for Anchor {}

impl Anchor {
    /// An anchor holding no refcount.
    pub fn empty() -> Self {
        Anchor {
            ctrl: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Allocates a fresh control block with `deleter` installed, and holds
    /// its initial strong reference.
    pub(crate) fn new(deleter: Deleter) -> Self {
        let raw = ControlBlock::new(deleter);
        Anchor {
            ctrl: AtomicPtr::new(raw.as_ptr()),
        }
    }

    fn load(&self) -> Option<NonNull<ControlBlock>> {
        NonNull::new(self.ctrl.load(Ordering::Acquire))
    }

    /// True iff this anchor currently holds a refcount.
    pub fn is_armed(&self) -> bool {
        self.load().is_some()
    }

    /// Mints a strong observer aliased to `ptr` iff this anchor currently
    /// holds a refcount; `None` if it is empty.
    ///
    /// A single atomic load of the control pointer, followed by a CAS loop
    /// on its strong count (the same one [`Weak::upgrade`] uses) — there is
    /// no separate "is it armed" check whose answer a concurrent `reset` on
    /// another thread can invalidate before we act on it. If the load sees
    /// null, or the CAS loop finds the strong count already at zero, this
    /// returns `None` instead of ever dereferencing a stale control block.
    pub fn make_strong<T: ?Sized>(&self, ptr: NonNull<T>) -> Option<Strong<T>> {
        let ctrl = self.load()?;
        // SAFETY: `ctrl` was just loaded from this anchor; `try_incr_strong`
        // only requires `ctrl` to still be live, which it is for the
        // duration of this call regardless of whether the increment
        // succeeds.
        if unsafe { ControlBlock::try_incr_strong(ctrl) } {
            // SAFETY: the increment above gives us a strong reference of our
            // own, independent of the anchor's.
            Some(unsafe { Strong::from_counted(ptr, ctrl) })
        } else {
            None
        }
    }

    /// Mints a weak observer aliased to `ptr` iff this anchor currently
    /// holds a refcount; `None` if it is empty. Does not contribute to the
    /// strong count.
    ///
    /// Same single-load shape as [`make_strong`](Self::make_strong): a weak
    /// observer can always be minted from a live control block regardless of
    /// its strong count, so there is no CAS loop here, just the one load.
    pub fn make_weak<T: ?Sized>(&self, ptr: NonNull<T>) -> Option<Weak<T>> {
        let ctrl = self.load()?;
        // SAFETY: `ctrl` was just loaded from this anchor, which keeps it
        // alive for the duration of this call.
        unsafe {
            ControlBlock::incr_weak(ctrl);
            Some(Weak::from_counted(ptr, ctrl))
        }
    }

    /// Drops the held refcount. If this was the last strong reference, the
    /// deleter installed at construction fires synchronously, on this
    /// thread, before `reset` returns.
    pub fn reset(&self) {
        let old = self.ctrl.swap(ptr::null_mut(), Ordering::AcqRel);
        if let Some(ctrl) = NonNull::new(old) {
            // SAFETY: this anchor held the strong reference being released;
            // swapping it out first means nobody can observe this anchor as
            // still armed while the decrement is in flight.
            unsafe { ControlBlock::decr_strong(ctrl) };
        }
    }
}

impl Clone for Anchor {
    fn clone(&self) -> Self {
        match self.load() {
            Some(ctrl) => {
                // SAFETY: `ctrl` was just loaded from this anchor, which is
                // enough to make the load itself valid; whether the
                // increment below actually succeeds is handled by the CAS
                // loop, not by any assumption that the block stays armed.
                let acquired = unsafe { ControlBlock::try_incr_strong(ctrl) };
                if acquired {
                    Anchor {
                        ctrl: AtomicPtr::new(ctrl.as_ptr()),
                    }
                } else {
                    // A concurrent reset dropped the strong count to zero
                    // between our load and the CAS: same outcome as
                    // copy-from-empty.
                    Anchor::empty()
                }
            }
            // Copy-from-moved-from (and copy-from-empty) anchors are empty.
            None => Anchor::empty(),
        }
    }
}

impl Drop for Anchor {
    fn drop(&mut self) {
        self.reset();
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Anchor::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;

    #[test]
    fn empty_anchor_is_not_armed() {
        let a = Anchor::empty();
        assert!(!a.is_armed());
    }

    #[test]
    fn minting_from_an_empty_anchor_returns_none_not_panic() {
        let a = Anchor::empty();
        let x = 1i32;
        assert!(a.make_strong(NonNull::from(&x)).is_none());
        assert!(a.make_weak(NonNull::from(&x)).is_none());
    }

    #[test]
    fn arm_mint_reset_fires_deleter_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let anchor = Anchor::new(Box::new(move || {
            fired2.fetch_add(1, StdOrdering::SeqCst);
        }));
        assert!(anchor.is_armed());

        let x = 5i32;
        let s1 = anchor.make_strong(NonNull::from(&x)).unwrap();
        let s2 = s1.clone();
        drop(s1);
        assert_eq!(fired.load(StdOrdering::SeqCst), 0);

        anchor.reset();
        // The anchor's own refcount is gone, but s2 still holds one.
        assert_eq!(fired.load(StdOrdering::SeqCst), 0);
        assert!(!anchor.is_armed());
        drop(s2);
        assert_eq!(fired.load(StdOrdering::SeqCst), 1);
    }

    #[test]
    fn clone_of_empty_anchor_is_empty() {
        let empty = Anchor::empty();
        let cloned = empty.clone();
        assert!(!cloned.is_armed());
    }

    #[test]
    fn weak_upgrade_fails_after_reset() {
        let anchor = Anchor::new(Box::new(|| {}));
        let x = 1i32;
        let w = anchor.make_weak(NonNull::from(&x)).unwrap();
        assert!(w.upgrade().is_some());
        anchor.reset();
        assert!(w.upgrade().is_none());
    }
}
