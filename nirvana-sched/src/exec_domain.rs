//! `ExecDomain` lifecycle state machine (spec.md §4.4).

use crate::error::SchedError;
use crate::mem_context::MemContext;
use crate::sync_domain::SyncDomain;
use nirvana_port::timer::{DeadlineTime, DEADLINE_INFINITE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdState {
    Created,
    Queued,
    Running,
    Suspended,
    Finished,
}

/// Three deadline policies (spec.md §4.4): synchronous calls carry their
/// own deadline; async calls default to inheriting the caller's; oneway
/// calls default to `DEADLINE_INFINITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePolicy {
    Synchronous(DeadlineTime),
    Async { inherited: DeadlineTime },
    Oneway,
}

impl DeadlinePolicy {
    pub fn resolve(self) -> DeadlineTime {
        match self {
            DeadlinePolicy::Synchronous(d) => d,
            DeadlinePolicy::Async { inherited } => inherited,
            DeadlinePolicy::Oneway => DEADLINE_INFINITE,
        }
    }
}

static NEXT_ED_ID: AtomicU64 = AtomicU64::new(1);

pub struct ExecDomain {
    id: u64,
    state: Mutex<EdState>,
    deadline: DeadlineTime,
    cancelled: AtomicBool,
    pub mem_context: Arc<MemContext>,
    runnable: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub(crate) sync_domain: Mutex<Option<Arc<SyncDomain>>>,
}

impl ExecDomain {
    pub fn new(policy: DeadlinePolicy, mem_context: Arc<MemContext>, runnable: Box<dyn FnOnce() + Send>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ED_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(EdState::Created),
            deadline: policy.resolve(),
            cancelled: AtomicBool::new(false),
            mem_context,
            runnable: Mutex::new(Some(runnable)),
            sync_domain: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> DeadlineTime {
        self.deadline
    }

    pub fn state(&self) -> EdState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, s: EdState) {
        *self.state.lock() = s;
    }

    pub(crate) fn take_runnable(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.runnable.lock().take()
    }

    /// Requests cancellation. The domain keeps running until its next
    /// suspension-safe point, which raises [`SchedError::Cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Call from within the running domain's own code at a
    /// suspension-safe point to observe a pending cancellation.
    pub fn checkpoint(&self) -> Result<(), SchedError> {
        if self.is_cancelled() {
            Err(SchedError::Cancelled)
        } else {
            Ok(())
        }
    }
}
