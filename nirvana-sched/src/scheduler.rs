//! Worker pool and global ready queue (spec.md §4.4).
//!
//! Grounded on `original_source/Source/PriorityQueue.h`-backed ready
//! queues plus the worker-pool-over-`hardware_concurrency()` pattern;
//! the "pop ready ED, attach, run, detach, loop" worker body is lifted
//! almost verbatim from spec.md's wording.

use crate::error::SchedError;
use crate::exec_domain::{EdState, ExecDomain};
use crate::sync_domain::SyncDomain;
use nirvana_pqueue::PriorityQueue;
use nirvana_port::SystemInfo;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Scheduler {
    global: PriorityQueue<Arc<ExecDomain>>,
    doorbell: (Mutex<u64>, Condvar),
    shutdown: AtomicBool,
    /// Set while the runtime is in `module_terminate`: disables
    /// stateless-object creation and certain binder calls (spec.md §4.4
    /// "Restricted mode").
    restricted: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(sysinfo: &dyn SystemInfo) -> Arc<Self> {
        let this = Arc::new(Self {
            global: PriorityQueue::new(),
            doorbell: (Mutex::new(0), Condvar::new()),
            shutdown: AtomicBool::new(false),
            restricted: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        });
        let count = sysinfo.hardware_concurrency().max(1);
        let mut workers = Vec::with_capacity(count);
        for idx in 0..count {
            let sched = this.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("nirvana-worker-{idx}"))
                    .spawn(move || sched.worker_loop())
                    .expect("failed to spawn scheduler worker thread"),
            );
        }
        *this.workers.lock() = workers;
        this
    }

    pub fn enter_restricted_mode(&self) {
        self.restricted.store(true, Ordering::Release);
        tracing::info!("scheduler entering restricted (module_terminate) mode");
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted.load(Ordering::Acquire)
    }

    pub fn check_unrestricted_creation(&self) -> Result<(), SchedError> {
        if self.is_restricted() {
            Err(SchedError::NoPermission)
        } else {
            Ok(())
        }
    }

    /// `schedule(sync_domain)`: moves `ed` into `target`, leaving its
    /// previous domain (if any); `target = None` runs it in the free
    /// (parallel) context.
    pub fn schedule(self: &Arc<Self>, ed: Arc<ExecDomain>, target: Option<Arc<SyncDomain>>) {
        if let Some(old) = ed.sync_domain.lock().take() {
            old.leave(&ed);
        }
        match target {
            Some(sd) => sd.enqueue(ed),
            None => self.publish(ed),
        }
    }

    pub(crate) fn publish(&self, ed: Arc<ExecDomain>) {
        ed.set_state(EdState::Queued);
        self.global.insert(ed.deadline(), ed);
        let (lock, cvar) = &self.doorbell;
        *lock.lock() += 1;
        cvar.notify_all();
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.global.delete_min() {
                Some((_, ed)) => self.run(ed),
                None => {
                    let (lock, cvar) = &self.doorbell;
                    let mut guard = lock.lock();
                    cvar.wait_for(&mut guard, Duration::from_millis(50));
                }
            }
        }
    }

    fn run(self: &Arc<Self>, ed: Arc<ExecDomain>) {
        ed.set_state(EdState::Running);
        crate::current::set_current(Some(ed.clone()));
        if let Some(runnable) = ed.take_runnable() {
            runnable();
        }
        crate::current::set_current(None);
        // A cancelled running ED completes cleanup as if finished
        // (spec.md §4.4); no separate path is needed since the runnable
        // is expected to observe `checkpoint()` and unwind on its own.
        ed.set_state(EdState::Finished);
        if let Some(sd) = ed.sync_domain.lock().clone() {
            sd.on_finished(&ed);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let (lock, cvar) = &self.doorbell;
        {
            let _guard = lock.lock();
        }
        cvar.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
