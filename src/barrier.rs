//! [`Barrier`]: couples an [`Anchor`] to a one-shot [`Signal`] via a custom
//! deleter, and blocks at destruction time until every strong observer it
//! minted has been dropped.
//!
//! This is the `life_lock` of the crate's glossary: the core primitive the
//! rest of this crate exists to provide.
use std::ptr::NonNull;

use crate::anchor::Anchor;
use crate::observer::{Strong, Weak};
use crate::signal::Signal;

/// `NonNull` isn't `Send`; the boxed `Signal` it points at is, so this is
/// just a thin carrier letting the deleter closure (which must be `Send`,
/// since it may run on whichever thread drops the final strong observer)
/// hold a raw pointer to it.
#[derive(Clone, Copy)]
struct SignalPtr(NonNull<Signal>);
unsafe impl Send for SignalPtr {}

/// A one-shot lifetime barrier.
///
/// Starts `Empty`. [`arm`](Self::arm) transitions it to `Armed` on some
/// address; [`get_weak`](Self::get_weak) and [`get_strong`](Self::get_strong)
/// mint observers of that address; [`disarm`](Self::disarm) (also run by
/// `Drop`) blocks until every strong observer minted during this arm cycle
/// has been dropped, then returns the barrier to `Empty`.
///
/// A `Barrier` does **not** synchronize reads or writes to the observed
/// object's fields — only its own arm/disarm protocol. See the crate's
/// top-level docs for the full deadlock and livelock discussion.
pub struct Barrier {
    anchor: Anchor,
    /// Boxed so its address stays stable across an `arm`/`disarm` cycle
    /// even if the `Barrier` itself is moved while armed: the deleter
    /// installed by `arm` captures a raw pointer to this `Signal`, and a
    /// plain inline field would dangle the moment a move relocated it.
    signal: Box<Signal>,
}

impl Barrier {
    /// A fresh, `Empty` barrier.
    pub fn new() -> Self {
        Barrier {
            anchor: Anchor::empty(),
            signal: Box::new(Signal::new()),
        }
    }

    /// True iff this barrier is currently `Armed`.
    pub fn is_armed(&self) -> bool {
        self.anchor.is_armed()
    }

    /// Arms the barrier on `ptr`: installs a deleter that fires this
    /// barrier's signal when the last strong observer minted during this
    /// arm cycle is dropped.
    ///
    /// `ptr` is not retained by the barrier itself; it is only used to type
    /// this call (observers are minted later by passing the pointer again
    /// to [`get_weak`](Self::get_weak)/[`get_strong`](Self::get_strong)).
    /// Since `ptr` is a `NonNull`, a null referent can't reach this method,
    /// which satisfies the spec's "reject null at the API layer" choice.
    ///
    /// # Panics
    /// Panics if the barrier is already `Armed`. Callers must arm before
    /// publishing the barrier's address to any other thread; this method
    /// therefore takes `&mut self`.
    pub fn arm<T: ?Sized>(&mut self, ptr: NonNull<T>) {
        assert!(!self.is_armed(), "arm() called on an already-armed Barrier");
        let _ = ptr;
        self.signal.reset();
        // The `Signal` lives in its own heap allocation (see the field's
        // doc comment), so this pointer stays valid even if `self` moves
        // while armed; it only needs `self.signal`'s box itself to stay
        // alive, which holds until `disarm` has finished waiting.
        let signal_ptr = SignalPtr(NonNull::from(self.signal.as_ref()));
        self.anchor = Anchor::new(Box::new(move || {
            // SAFETY: the box backing `signal_ptr` is not freed until this
            // arm cycle's `disarm` has observed the signal fired and
            // returned, which cannot happen before this deleter runs.
            unsafe { signal_ptr.0.as_ref() }.fire();
        }));
    }

    /// Mints a weak observer of `ptr` iff the barrier is `Armed`; `None` in
    /// `Empty` state. Safe to call concurrently with `disarm` on another
    /// thread: `Anchor::make_weak` resolves "is it armed" and "mint from it"
    /// as one atomic step, so there is no window for a concurrent `disarm`
    /// to flip the answer out from under this call.
    pub fn get_weak<T: ?Sized>(&self, ptr: NonNull<T>) -> Option<Weak<T>> {
        self.anchor.make_weak(ptr)
    }

    /// Mints a strong observer of `ptr` iff the barrier is `Armed`; `None`
    /// in `Empty` state. Safe to call concurrently with `disarm` on another
    /// thread: such a call either returns a valid observer (whose release
    /// will be awaited) or `None` (once the anchor has been dropped).
    pub fn get_strong<T: ?Sized>(&self, ptr: NonNull<T>) -> Option<Strong<T>> {
        self.anchor.make_strong(ptr)
    }

    /// If `Empty`, a no-op. If `Armed`: drops this barrier's own hold on the
    /// control block, then blocks until every strong observer minted this
    /// arm cycle has also been dropped, then returns to `Empty`.
    ///
    /// Must not be called from two threads concurrently on the same
    /// barrier (minting observers concurrently from other threads is fine;
    /// see [`get_strong`](Self::get_strong)/[`get_weak`](Self::get_weak)).
    /// If the calling thread itself holds a live strong observer minted
    /// from this barrier, this call deadlocks: that is a documented
    /// hazard, not a detected error.
    pub fn disarm(&self) {
        if !self.anchor.is_armed() {
            return;
        }
        // Step 1: hold a temporary strong observer for the barrier itself
        // (any non-null referent works). `disarm` is documented not to run
        // concurrently with itself, so nothing else can have reset this
        // anchor between the `is_armed` check above and here.
        let self_ptr = NonNull::from(self);
        let tmp = self
            .anchor
            .make_strong(self_ptr)
            .expect("anchor was armed and disarm does not run concurrently with itself");
        // Step 2: drop this barrier's own anchor contribution. `tmp` keeps
        // the control block's strong count >= 1, so the deleter has not
        // fired yet, and any other thread's `get_strong`/`get_weak` call
        // from here on observes `Empty`.
        self.anchor.reset();
        // Step 3/4: drop `tmp`. If it was the last strong reference, the
        // deleter fires inline, right here, and fires the signal. If
        // another thread still holds a strong observer, the deleter fires
        // later, when that thread releases it.
        drop(tmp);
        // Step 5: wait for the signal, then we're back to `Empty`.
        self.signal.wait_until_fired();
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    // S1: single-thread baseline.
    #[test]
    fn s1_single_thread_baseline() {
        let x = 42i32;
        let mut b = Barrier::new();
        assert!(!b.is_armed());
        b.arm(NonNull::from(&x));
        assert!(b.is_armed());

        let weak = b.get_weak(NonNull::from(&x)).unwrap();
        let strong = b.get_strong(NonNull::from(&x)).unwrap();
        assert_eq!(*strong, 42);
        drop(strong);

        b.disarm();
        assert!(!b.is_armed());
        assert!(weak.upgrade().is_none());
    }

    // Invariant 3: idempotence.
    #[test]
    fn idempotent_disarm() {
        let x = 1i32;
        let mut b = Barrier::new();
        b.arm(NonNull::from(&x));
        b.disarm();
        b.disarm(); // no-op, must not block or panic
        assert!(!b.is_armed());
    }

    // Invariant 6: weak-after-disarm.
    #[test]
    fn weak_after_disarm_is_always_null() {
        let x = 1i32;
        let mut b = Barrier::new();
        b.arm(NonNull::from(&x));
        let w1 = b.get_weak(NonNull::from(&x)).unwrap();
        let w2 = b.get_weak(NonNull::from(&x)).unwrap();
        b.disarm();
        assert!(w1.upgrade().is_none());
        assert!(w2.upgrade().is_none());
        assert!(b.get_weak(NonNull::from(&x)).is_none());
        assert!(b.get_strong(NonNull::from(&x)).is_none());
    }

    // Invariant 5: non-deletion — the deleter never touches the object.
    #[test]
    fn deleter_does_not_touch_the_object() {
        struct Loud(StdArc<AtomicUsize>);
        impl Drop for Loud {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let drops = StdArc::new(AtomicUsize::new(0));
        let obj = Loud(drops.clone());
        let mut b = Barrier::new();
        b.arm(NonNull::from(&obj));
        let s = b.get_strong(NonNull::from(&obj)).unwrap();
        drop(s);
        b.disarm();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(obj);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // S6: rearm on a fresh address after a full disarm cycle.
    #[test]
    fn s6_rearm_on_fresh_address() {
        let mut b = Barrier::new();
        let x = 1i32;
        b.arm(NonNull::from(&x));
        let wx = b.get_weak(NonNull::from(&x)).unwrap();
        b.disarm();
        assert!(wx.upgrade().is_none());

        let y = 2i32;
        b.arm(NonNull::from(&y));
        let sy = b.get_strong(NonNull::from(&y)).unwrap();
        assert_eq!(*sy, 2);
        drop(sy);
        b.disarm();
        assert!(!b.is_armed());
    }

    // S2: cross-thread callback — a remote strong observer delays disarm.
    #[test]
    fn s2_cross_thread_strong_delays_disarm() {
        let obj = StdArc::new(AtomicUsize::new(0));
        let mut b = Barrier::new();
        b.arm(NonNull::from(obj.as_ref()));

        let strong = b.get_strong(NonNull::from(obj.as_ref())).unwrap();
        let release_order = StdArc::new(AtomicUsize::new(0));
        let release_order2 = release_order.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            release_order2.store(1, Ordering::SeqCst);
            drop(strong);
        });

        b.disarm();
        // disarm only returns after the spawned thread released its strong
        // observer.
        assert_eq!(release_order.load(Ordering::SeqCst), 1);
        h.join().unwrap();
    }

    // S2/S3: several threads hammer get_strong/get_weak while another thread
    // disarms concurrently. This races the anchor's single-load-then-CAS
    // minting against `reset`'s pointer swap; it must never panic (the old
    // check-then-act `is_armed().then(make_strong)` shape could), and once
    // `disarm` has returned, minting must be consistently empty.
    #[test]
    fn concurrent_minting_races_disarm_without_panicking() {
        let obj = StdArc::new(AtomicUsize::new(0));
        let mut b = Barrier::new();
        b.arm(NonNull::from(obj.as_ref()));

        thread::scope(|s| {
            for _ in 0..4 {
                let b = &b;
                let obj = &obj;
                s.spawn(move || {
                    for _ in 0..2000 {
                        if let Some(strong) = b.get_strong(NonNull::from(obj.as_ref())) {
                            strong.fetch_add(1, Ordering::Relaxed);
                        }
                        let _ = b.get_weak(NonNull::from(obj.as_ref()));
                    }
                });
            }
            thread::sleep(Duration::from_micros(50));
            b.disarm();
        });

        assert!(!b.is_armed());
        assert!(b.get_strong(NonNull::from(obj.as_ref())).is_none());
        assert!(b.get_weak(NonNull::from(obj.as_ref())).is_none());
    }

    #[test]
    #[should_panic(expected = "already-armed")]
    fn double_arm_panics() {
        let x = 1i32;
        let mut b = Barrier::new();
        b.arm(NonNull::from(&x));
        b.arm(NonNull::from(&x));
    }
}
