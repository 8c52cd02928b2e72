//! [`LifeLocked`]: a convenience container that packages inline storage for
//! some `T` together with a [`Barrier`], so callers can't get the
//! construction/destruction ordering wrong.
//!
//! This is the `life_locked` of the crate's glossary.
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::barrier::Barrier;
use crate::observer::{Strong, Weak};

/// Inline storage for a `T` plus the [`Barrier`] that lets other threads
/// observe it safely.
///
/// Occupied iff a `T` has been [`construct`](Self::construct)ed and not yet
/// [`reset`](Self::reset). Dropping an occupied `LifeLocked` disarms the
/// barrier (waiting for outstanding strong observers) before running `T`'s
/// destructor, same as an explicit `reset()`.
///
/// # Don't move this while occupied
///
/// `Strong`/`Weak` observers alias the address of the inline `T` slot
/// directly. Moving an occupied `LifeLocked` (e.g. out of a local variable
/// into a `Vec`, or via `mem::swap`) relocates that slot out from under
/// any observer minted before the move, the same hazard any Rust type
/// with pointers into its own fields has without `Pin`. This is a
/// documented, undefended misuse case, same as racing `reset()`: arm an
/// occupied `LifeLocked` in its final location (a `Box`, a struct field,
/// a stack frame you don't relocate) before handing out observers.
pub struct LifeLocked<T> {
    slot: UnsafeCell<MaybeUninit<T>>,
    barrier: Barrier,
    occupied: bool,
}

// SAFETY: a `LifeLocked<T>` behaves like a container of `T` shared through
// its observers, so it needs the same bounds `Arc<T>`/`Mutex<T>` would.
unsafe impl<T: Send> Send for LifeLocked<T> {}
unsafe impl<T: Send + Sync> Sync for LifeLocked<T> {}

impl<T> LifeLocked<T> {
    /// An empty cell, holding neither a `T` nor an armed barrier.
    pub fn empty() -> Self {
        LifeLocked {
            slot: UnsafeCell::new(MaybeUninit::uninit()),
            barrier: Barrier::new(),
            occupied: false,
        }
    }

    /// Constructs an already-occupied cell in one step.
    pub fn new(value: T) -> Self {
        let mut this = Self::empty();
        this.construct(|| value);
        this
    }

    /// True iff this cell currently holds a live `T`.
    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    fn slot_ptr(&self) -> NonNull<T> {
        // SAFETY: only ever dereferenced while occupied by callers that
        // already checked so, same contract as `value`/`raw_ptr`.
        unsafe { NonNull::new_unchecked((*self.slot.get()).as_mut_ptr()) }
    }

    /// Constructs a `T` in place by calling `make`, then arms the barrier on
    /// it. Order is strict: the object is fully constructed before the
    /// barrier is armed.
    ///
    /// If `make` panics, nothing has been written into the cell yet, so it
    /// stays empty (mirrors the spec's "if `T`'s constructor throws, the
    /// Cell stays empty").
    ///
    /// # Panics
    /// Panics if the cell is already occupied.
    pub fn construct(&mut self, make: impl FnOnce() -> T) {
        assert!(!self.occupied, "construct() called on an occupied LifeLocked");
        let value = make();
        // SAFETY: not occupied, so there is no live value here to leak or
        // overwrite.
        unsafe {
            (*self.slot.get()).write(value);
        }
        self.occupied = true;
        self.barrier.arm(self.slot_ptr());
    }

    /// Mints a weak observer of the stored `T`, or `None` if the cell is
    /// empty.
    pub fn weak(&self) -> Option<Weak<T>> {
        self.occupied
            .then(|| self.barrier.get_weak(self.slot_ptr()))
            .flatten()
    }

    /// Mints a strong observer of the stored `T`, or `None` if the cell is
    /// empty.
    pub fn strong(&self) -> Option<Strong<T>> {
        self.occupied
            .then(|| self.barrier.get_strong(self.slot_ptr()))
            .flatten()
    }

    /// If occupied: disarms the barrier (blocking until all strong
    /// observers minted from it have been dropped), then runs `T`'s
    /// destructor, then marks the cell empty. A no-op if already empty.
    pub fn reset(&mut self) {
        if !self.occupied {
            return;
        }
        self.barrier.disarm();
        // SAFETY: occupied, so slot holds a live T; the barrier just
        // finished disarming, so no strong observer can be reading it.
        unsafe {
            std::ptr::drop_in_place((*self.slot.get()).as_mut_ptr());
        }
        self.occupied = false;
    }

    /// Borrows the stored value.
    ///
    /// # Panics
    /// Panics (debug builds) if the cell is empty; callers are expected to
    /// check [`is_occupied`](Self::is_occupied) first.
    pub fn value(&self) -> &T {
        debug_assert!(self.occupied, "value() called on an empty LifeLocked");
        // SAFETY: occupied, so slot holds a live, initialized T.
        unsafe { (*self.slot.get()).assume_init_ref() }
    }

    /// Raw pointer to the stored value, valid only while occupied and not
    /// racing a concurrent `reset`.
    pub fn raw_ptr(&self) -> NonNull<T> {
        self.slot_ptr()
    }
}

impl<T> Drop for LifeLocked<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Default> Default for LifeLocked<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn empty_cell_has_no_observers() {
        let c: LifeLocked<i32> = LifeLocked::empty();
        assert!(!c.is_occupied());
        assert!(c.weak().is_none());
        assert!(c.strong().is_none());
    }

    #[test]
    fn construct_then_reset_round_trip() {
        let mut c = LifeLocked::new(7i32);
        assert!(c.is_occupied());
        assert_eq!(*c.value(), 7);

        let w = c.weak().unwrap();
        let s = c.strong().unwrap();
        assert_eq!(*s, 7);
        drop(s);

        c.reset();
        assert!(!c.is_occupied());
        assert!(w.upgrade().is_none());
    }

    // Invariant 4: Cell ordering — T's destructor runs strictly after
    // disarm() returns, i.e. after every observer has released its strong
    // reference.
    #[test]
    fn destructor_runs_after_disarm() {
        struct Loud(Arc<AtomicUsize>);
        impl Drop for Loud {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let drops = Arc::new(AtomicUsize::new(0));
        let mut c = LifeLocked::new(Loud(drops.clone()));
        let s = c.strong().unwrap();
        drop(s);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        c.reset();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // S5: Cell round-trip with a worker thread mutating through a promoted
    // strong observer.
    #[test]
    fn s5_cell_round_trip_with_worker() {
        use std::sync::Mutex;

        let mut c = LifeLocked::new(Mutex::new(Vec::<i32>::new()));
        let w = c.weak().unwrap();
        let gave_up = Arc::new(AtomicUsize::new(0));
        let gave_up2 = gave_up.clone();

        let h = thread::spawn(move || {
            let mut pushed = 0usize;
            for i in 0..200 {
                if let Some(s) = w.upgrade() {
                    s.lock().unwrap().push(i);
                    pushed += 1;
                } else {
                    gave_up2.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                thread::sleep(Duration::from_micros(200));
            }
            pushed
        });

        thread::sleep(Duration::from_millis(5));
        c.reset();
        // reset() (and thus disarm) only returns once the worker has
        // released any strong observer it was holding, so by now the
        // worker cannot be mid-push; every push it will ever make has
        // already completed.
        h.join().unwrap();

        assert_eq!(gave_up.load(Ordering::SeqCst), 1);
        assert!(!c.is_occupied());
    }
}
