//! Weak and strong "observer" handles: ref-counted pointers whose referent
//! is supplied by the caller (aliasing a raw pointer into someone else's
//! memory) while their refcount is shared with a [`ControlBlock`].
//!
//! This is the aliasing-constructor trick from the spec's Design Notes,
//! done from scratch rather than through a host smart pointer: `Strong<T>`
//! and `Weak<T>` carry a `NonNull<T>` referent plus a `NonNull<ControlBlock>`
//! that does not have to have anything to do with `T`.
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::control::ControlBlock;

/// A strong observer of some `T` living in memory it does not own.
///
/// For as long as a `Strong<T>` is alive, the [`Barrier`](crate::Barrier) it
/// was minted from cannot finish [`disarm`](crate::Barrier::disarm)ing.
pub struct Strong<T: ?Sized> {
    ptr: NonNull<T>,
    ctrl: NonNull<ControlBlock>,
}

// SAFETY: a `Strong<T>` behaves like a shared reference to `T` that can be
// handed to another thread, so it needs the same bounds as `Arc<T>`.
unsafe impl<T: ?Sized + Sync + Send> Send for Strong<T> {}
unsafe impl<T: ?Sized + Sync + Send> Sync for Strong<T> {}

impl<T: ?Sized> Strong<T> {
    /// Takes ownership of a strong reference that has already been counted
    /// (e.g. the initial strong reference a freshly allocated control block
    /// starts with), without incrementing anything.
    ///
    /// # Safety
    /// The caller must be relinquishing exactly one strong reference it
    /// already holds on `ctrl` to this new `Strong<T>`.
    pub(crate) unsafe fn from_counted(ptr: NonNull<T>, ctrl: NonNull<ControlBlock>) -> Self {
        Strong { ptr, ctrl }
    }

    pub(crate) fn ctrl(&self) -> NonNull<ControlBlock> {
        self.ctrl
    }

    pub(crate) fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Mints a [`Weak`] observer aliased to the same referent, sharing this
    /// observer's control block.
    pub fn downgrade(this: &Self) -> Weak<T> {
        // SAFETY: `this` keeps the control block alive.
        unsafe { ControlBlock::incr_weak(this.ctrl) };
        Weak {
            ptr: this.ptr,
            ctrl: this.ctrl,
        }
    }

    /// Number of strong observers currently sharing this control block.
    pub fn strong_count(this: &Self) -> usize {
        // SAFETY: `this` keeps the control block alive.
        unsafe { ControlBlock::strong_count(this.ctrl) }
    }
}

impl<T: ?Sized> Deref for Strong<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a live `Strong<T>` is only produced aliased to a pointer
        // the original caller promised stays valid for its lifetime.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> Clone for Strong<T> {
    fn clone(&self) -> Self {
        // SAFETY: `self` keeps the control block alive.
        unsafe { ControlBlock::incr_strong(self.ctrl) };
        Strong {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }
}

impl<T: ?Sized> Drop for Strong<T> {
    fn drop(&mut self) {
        // SAFETY: `self` keeps the control block alive until this call.
        unsafe { ControlBlock::decr_strong(self.ctrl) };
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Strong").field(&**self).finish()
    }
}

/// A weak observer of some `T` living in memory it does not own.
///
/// Unlike [`Strong`], holding a `Weak<T>` never delays a `Barrier`'s
/// [`disarm`](crate::Barrier::disarm); it only lets the holder ask, later,
/// whether the object is still observable.
pub struct Weak<T: ?Sized> {
    ptr: NonNull<T>,
    ctrl: NonNull<ControlBlock>,
}

unsafe impl<T: ?Sized + Sync + Send> Send for Weak<T> {}
unsafe impl<T: ?Sized + Sync + Send> Sync for Weak<T> {}

impl<T: ?Sized> Weak<T> {
    /// Takes ownership of a weak reference already counted on `ctrl`.
    ///
    /// # Safety
    /// See [`Strong::from_counted`].
    pub(crate) unsafe fn from_counted(ptr: NonNull<T>, ctrl: NonNull<ControlBlock>) -> Self {
        Weak { ptr, ctrl }
    }

    pub(crate) fn ctrl(&self) -> NonNull<ControlBlock> {
        self.ctrl
    }

    /// Promotes to a [`Strong`] observer iff the strong count was nonzero at
    /// the instant of promotion; returns `None` if the referent is no longer
    /// observable (the barrier has disarmed, or is mid-disarm past the final
    /// strong drop).
    pub fn upgrade(&self) -> Option<Strong<T>> {
        // SAFETY: `self` keeps the control block alive.
        if unsafe { ControlBlock::try_incr_strong(self.ctrl) } {
            Some(Strong {
                ptr: self.ptr,
                ctrl: self.ctrl,
            })
        } else {
            None
        }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        // SAFETY: `self` keeps the control block alive.
        unsafe { ControlBlock::incr_weak(self.ctrl) };
        Weak {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        // SAFETY: `self` keeps the control block alive until this call.
        unsafe { ControlBlock::decr_weak(self.ctrl) };
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Weak(..)")
    }
}
