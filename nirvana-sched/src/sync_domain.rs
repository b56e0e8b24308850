//! Cooperative `SyncDomain` island: at most one of its `ExecDomain`s is
//! ever published to the scheduler's global ready queue at a time, so
//! domains serialize the same way a CORBA POA single-threaded policy or
//! an actor mailbox would, while still sharing the scheduler's worker
//! pool (spec.md §4.4).

use crate::event::Event;
use crate::exec_domain::{EdState, ExecDomain};
use nirvana_pqueue::PriorityQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::scheduler::Scheduler;

static NEXT_SD_ID: AtomicU64 = AtomicU64::new(1);

pub struct SyncDomain {
    id: u64,
    ready: PriorityQueue<Arc<ExecDomain>>,
    current: Mutex<Option<Arc<ExecDomain>>>,
    /// Notified whenever `current` is cleared, so a suspended ED waiting
    /// to reacquire the pin in [`SyncDomain::reacquire`] wakes promptly
    /// instead of only on its own event.
    freed: Condvar,
    scheduler: Weak<Scheduler>,
}

impl SyncDomain {
    pub fn new(scheduler: &Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SD_ID.fetch_add(1, Ordering::Relaxed),
            ready: PriorityQueue::new(),
            current: Mutex::new(None),
            freed: Condvar::new(),
            scheduler: Arc::downgrade(scheduler),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        self.current.lock().is_none() && self.ready.is_empty()
    }

    /// Enqueues `ed` on this domain's own ready queue; if the domain is
    /// currently idle, immediately publishes the new head to the
    /// scheduler's global queue.
    pub fn enqueue(self: &Arc<Self>, ed: Arc<ExecDomain>) {
        ed.set_state(EdState::Queued);
        *ed.sync_domain.lock() = Some(self.clone());
        self.ready.insert(ed.deadline(), ed);
        self.try_publish();
    }

    fn try_publish(self: &Arc<Self>) {
        let mut current = self.current.lock();
        if current.is_some() {
            return;
        }
        if let Some((_, ed)) = self.ready.delete_min() {
            *current = Some(ed.clone());
            drop(current);
            if let Some(sched) = self.scheduler.upgrade() {
                sched.publish(ed);
            }
        }
    }

    /// Called by the scheduler once `ed` finishes, to release the pin and
    /// publish this domain's next entry, if any.
    pub(crate) fn on_finished(self: &Arc<Self>, ed: &Arc<ExecDomain>) {
        {
            let mut current = self.current.lock();
            if current.as_ref().map(|c| Arc::ptr_eq(c, ed)).unwrap_or(false) {
                *current = None;
            }
        }
        self.freed.notify_all();
        self.try_publish();
    }

    /// Releases the pin without running the next entry — used when an ED
    /// is moved to a different sync context before completing (spec.md
    /// §4.4 "Cross-context scheduling") and by [`Self::suspend_and_wait`]
    /// before blocking.
    pub(crate) fn leave(self: &Arc<Self>, ed: &Arc<ExecDomain>) {
        {
            let mut current = self.current.lock();
            if current.as_ref().map(|c| Arc::ptr_eq(c, ed)).unwrap_or(false) {
                *current = None;
            }
        }
        self.freed.notify_all();
        self.try_publish();
    }

    /// Suspends `ed` for the duration of a blocking wait on `event`
    /// (spec.md §5): releases the pin the same way [`Self::leave`] does
    /// so a sibling ED on this sync context can run while this worker
    /// thread is parked, then reacquires the pin before returning so the
    /// single-threaded policy holds again once `ed` resumes. There is no
    /// separate dispatch step back through the scheduler's ready queue —
    /// the same worker thread that suspended is the one that resumes,
    /// since this runtime has no stackful coroutines to hand off to
    /// another thread.
    pub(crate) fn suspend_and_wait(self: &Arc<Self>, ed: &Arc<ExecDomain>, event: &Event) {
        ed.set_state(EdState::Suspended);
        self.leave(ed);
        event.wait();
        self.reacquire(ed);
    }

    fn reacquire(self: &Arc<Self>, ed: &Arc<ExecDomain>) {
        let mut current = self.current.lock();
        loop {
            if current.is_none() {
                *current = Some(ed.clone());
                ed.set_state(EdState::Running);
                return;
            }
            self.freed.wait(&mut current);
        }
    }
}
