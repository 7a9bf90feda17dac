//! Sleep-then-spin waiting on the monotonic clock.
//!
//! `thread::sleep` alone overshoots by up to a scheduler quantum, pure spinning burns a
//! core for the whole replay. [`wait_until`] sleeps in short slices until the deadline is
//! within `spin_threshold`, then yields/spins the rest of the way. The cancel flag is
//! checked between slices, so a cancelled wait returns within one slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Below this, even `yield_now` is too coarse.
const PURE_SPIN: Duration = Duration::from_micros(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Precision {
    /// Stop sleeping once the deadline is this close.
    pub spin_threshold: Duration,
    /// Longest single sleep; bounds cancellation latency.
    pub max_slice: Duration,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            spin_threshold: Duration::from_millis(2),
            max_slice: Duration::from_millis(5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    Reached,
    Cancelled,
}

/// Block until `deadline` or until `cancel` is set.
pub fn wait_until(deadline: Instant, precision: Precision, cancel: &AtomicBool) -> Wait {
    loop {
        if cancel.load(Ordering::Acquire) {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::Reached;
        }
        let remaining = deadline - now;
        if remaining > precision.spin_threshold {
            thread::sleep((remaining - precision.spin_threshold).min(precision.max_slice));
        } else if remaining > PURE_SPIN {
            thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}
