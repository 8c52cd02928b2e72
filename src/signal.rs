//! The one-bit [`Signal`] that separates "strong count > 0" from "strong
//! count == 0" for a single arm/disarm cycle, plus the two wait strategies
//! from the spec's wait algorithm section.
//!
//! With the `native-wait` feature (on by default, matching the teacher
//! crate's own choice), waiting blocks on a futex-style primitive via the
//! teacher's `atomic-wait` dependency. Without it, `backoff` implements the
//! spin-then-sleep fallback.
use std::sync::atomic::{AtomicU32, Ordering};

const NOT_FIRED: u32 = 0;
const FIRED: u32 = 1;

pub(crate) struct Signal {
    state: AtomicU32,
}

impl Signal {
    /// A freshly armed signal starts unfired.
    pub(crate) fn new() -> Self {
        Signal {
            state: AtomicU32::new(NOT_FIRED),
        }
    }

    /// Marks the signal fired. Called at most once per arm cycle, by
    /// whichever thread drops the final strong reference.
    pub(crate) fn fire(&self) {
        self.state.store(FIRED, Ordering::Release);
        #[cfg(feature = "native-wait")]
        atomic_wait::wake_all(&self.state);
    }

    /// Non-blocking check, used by tests and by callers who only want to
    /// poll.
    #[cfg(test)]
    pub(crate) fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Resets to the unfired state so the same `Signal` storage can be
    /// reused for the next arm cycle.
    pub(crate) fn reset(&self) {
        self.state.store(NOT_FIRED, Ordering::Relaxed);
    }

    /// Blocks the calling thread until [`fire`](Self::fire) has been
    /// called since the last [`reset`](Self::reset).
    pub(crate) fn wait_until_fired(&self) {
        #[cfg(feature = "native-wait")]
        {
            while self.state.load(Ordering::Acquire) == NOT_FIRED {
                atomic_wait::wait(&self.state, NOT_FIRED);
            }
        }
        #[cfg(not(feature = "native-wait"))]
        {
            backoff::wait_for(&self.state, NOT_FIRED, FIRED);
        }
    }
}

/// Adaptive spin-then-sleep wait, used when the `native-wait` feature is
/// disabled (e.g. targets without a futex-style primitive).
#[cfg(not(feature = "native-wait"))]
pub(crate) mod backoff {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Number of acquire-load spin iterations before falling back to
    /// sleeping. 2^14, as recommended.
    pub(crate) const SPIN_COUNT: u32 = 1 << 14;

    /// Upper bound on the sleep backoff exponent: sleeps are capped at
    /// 2^18 microseconds (~0.262s).
    pub(crate) const SLEEP_MAX_USEC_LOG2: u32 = 18;

    /// Spins, then sleeps with exponential backoff, until `state` reads as
    /// `target` (starting from the assumption it currently reads `not_yet`).
    pub(crate) fn wait_for(state: &AtomicU32, _not_yet: u32, target: u32) {
        for _ in 0..SPIN_COUNT {
            if state.load(Ordering::Acquire) == target {
                return;
            }
            std::hint::spin_loop();
        }
        let mut i: u32 = 0;
        loop {
            if state.load(Ordering::Acquire) == target {
                return;
            }
            let shift = i.min(SLEEP_MAX_USEC_LOG2);
            std::thread::sleep(Duration::from_micros(1u64 << shift));
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_then_wait_returns_immediately() {
        let s = Signal::new();
        assert!(!s.is_fired());
        s.fire();
        assert!(s.is_fired());
        s.wait_until_fired();
    }

    #[test]
    fn reset_clears_fired_state() {
        let s = Signal::new();
        s.fire();
        assert!(s.is_fired());
        s.reset();
        assert!(!s.is_fired());
    }

    #[test]
    fn cross_thread_fire_wakes_waiter() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let s = Arc::new(Signal::new());
        let s2 = s.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s2.fire();
        });
        s.wait_until_fired();
        h.join().unwrap();
    }
}
