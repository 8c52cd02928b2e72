#![warn(clippy::undocumented_unsafe_blocks)]

//! A one-shot lifetime barrier: lets an object stored in arbitrary memory
//! (a stack frame, a struct field, a heap cell) be observed through weak
//! and strong references from other threads, while its destruction stays
//! the prerogative of its owner.
//!
//! # The core idea
//!
//! [`Barrier`] couples a shared refcounted control block (whose deleter
//! fires when the last strong observer is dropped) to a blocking wait
//! performed at owner-destruction time:
//!
//! ```
//! use life_lock::Barrier;
//! use std::ptr::NonNull;
//!
//! let object = 42i32;
//! let mut barrier = Barrier::new();
//! barrier.arm(NonNull::from(&object));
//!
//! let weak = barrier.get_weak(NonNull::from(&object)).unwrap();
//! let strong = barrier.get_strong(NonNull::from(&object)).unwrap();
//! assert_eq!(*strong, 42);
//! drop(strong);
//!
//! // disarm() (also run by Drop) blocks until every strong observer
//! // minted this arm cycle has been dropped.
//! barrier.disarm();
//! assert!(weak.upgrade().is_none());
//! ```
//!
//! [`LifeLocked<T>`] packages an object slot together with its own
//! `Barrier` so callers can't get the construction/destruction ordering
//! wrong:
//!
//! ```
//! use life_lock::LifeLocked;
//!
//! let mut cell = LifeLocked::new(vec![1, 2, 3]);
//! let strong = cell.strong().unwrap();
//! assert_eq!(strong.len(), 3);
//! drop(strong);
//! cell.reset(); // blocks until outstanding strong observers drop, then
//!               // runs the Vec's destructor.
//! ```
//!
//! # What this crate does not do
//!
//! A `Barrier` does not synchronize reads or writes to the observed
//! object's fields (mutex/atomics are the caller's problem), does not
//! resurrect expired objects, and does not support overlapping arm/disarm
//! cycles on the same instance — only sequential rearm after a full
//! disarm. If the thread calling [`Barrier::disarm`] itself holds a live
//! strong observer minted from that same barrier, it waits on itself; this
//! is a documented deadlock hazard, not a defended-against misuse.
//!
//! # Concurrency model
//!
//! Minting observers ([`Barrier::get_weak`], [`Barrier::get_strong`]) is
//! safe to call concurrently with [`Barrier::disarm`] running on another
//! thread: such a call either returns a valid observer (whose release will
//! be awaited by the in-progress disarm) or `None` (once the barrier's
//! internal anchor has already been dropped). `disarm`/`Drop` themselves
//! must not be invoked from two threads at once on the same barrier, and
//! arming must happen before the barrier's address is published to any
//! other thread.
//!
//! # Build-time options
//!
//! - `native-wait` (on by default): waits for the one-shot signal via a
//!   futex-style primitive (the `atomic-wait` crate) instead of the
//!   adaptive spin/sleep backoff.
//!
//! # Relation to other crates
//!
//! This crate's wait loop is adapted from
//! [`rendezvous`](https://docs.rs/rendezvous), which implements a related
//! but distinct primitive: an adaptive barrier/waitgroup for letting N
//! threads rendezvous, rather than a one-shot owner/observer lifetime
//! coupling.

mod anchor;
mod barrier;
mod cell;
mod control;
mod observer;
mod signal;
mod sync;

pub use anchor::Anchor;
pub use barrier::Barrier;
pub use cell::LifeLocked;
pub use observer::{Strong, Weak};
