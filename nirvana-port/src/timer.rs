//! `Port` steady-clock time and deferred-wakeup timers.
//!
//! `DeadlineTime` is the absolute steady-clock tick count used throughout
//! the scheduler (spec.md §4.4's "Deadlines") and the priority queue's sort
//! key (spec.md §4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Absolute steady-clock time, in nanoseconds since an arbitrary epoch
/// fixed at process start. Totally ordered, which is all the scheduler and
/// priority queue require.
pub type DeadlineTime = u64;

/// Value used by `make_deadline` to represent "never" (oneway default).
pub const DEADLINE_INFINITE: DeadlineTime = u64::MAX;

#[derive(Clone)]
pub struct SteadyTime {
    origin: Instant,
}

impl Default for SteadyTime {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl SteadyTime {
    pub fn now(&self) -> DeadlineTime {
        self.origin.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
    }

    /// `make_deadline(timeout)` = steady_now + timeout, clamped to
    /// `DEADLINE_INFINITE` (spec.md §4.4).
    pub fn make_deadline(&self, timeout: Duration) -> DeadlineTime {
        self.now().saturating_add(timeout.as_nanos().min(u128::from(u64::MAX)) as u64)
    }
}

/// Monotonically increasing tiebreaker for deadline ties (spec.md §4.4:
/// "ties broken by creation counter").
#[derive(Default)]
pub struct CreationCounter(AtomicU64);

impl CreationCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Port timer service: schedules a one-shot wakeup at an absolute deadline.
/// Used by `FileLockQueue` (spec.md §4.11) and request timeouts.
pub trait Timer: Send + Sync {
    /// Returns a handle that can be dropped to cancel before it fires.
    fn schedule(&self, deadline: DeadlineTime, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

pub struct TimerHandle {
    pub(crate) cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn cancel(mut self) {
        if let Some(c) = self.cancel.take() {
            c();
        }
    }
}
