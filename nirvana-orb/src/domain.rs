//! Peer ORB instances and DGC bookkeeping (spec.md §4.7).

use nirvana_core::exception::{CompletionStatus, ExceptionKind, SystemException};
use nirvana_sched::SyncDomain;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    /// Another protected domain in the same system (ESIOP transport).
    SameSystem,
    /// A peer ORB reached over the network (GIOP transport).
    Remote,
}

/// The add-pending / live / delete-pending partition of a domain's
/// DGC-tracked object keys (spec.md §4.7, §3 "Domain").
#[derive(Default)]
struct DgcSets {
    add_pending: HashSet<Vec<u8>>,
    live: HashSet<Vec<u8>>,
    delete_pending: HashSet<Vec<u8>>,
}

pub struct Domain {
    pub kind: DomainKind,
    binder: Arc<SyncDomain>,
    owned_objects: Mutex<HashSet<Vec<u8>>>,
    dgc: Mutex<DgcSets>,
    last_heard_from: Mutex<Instant>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    down: AtomicBool,
    refcount: AtomicUsize,
    next_request_id: AtomicU64,
}

impl Domain {
    pub fn new(kind: DomainKind, binder: Arc<SyncDomain>) -> Arc<Self> {
        Self::with_heartbeat(kind, binder, Duration::from_secs(2), Duration::from_secs(6))
    }

    pub fn with_heartbeat(kind: DomainKind, binder: Arc<SyncDomain>, interval: Duration, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            binder,
            owned_objects: Mutex::new(HashSet::new()),
            dgc: Mutex::new(DgcSets::default()),
            last_heard_from: Mutex::new(Instant::now()),
            heartbeat_interval: interval,
            heartbeat_timeout: timeout,
            down: AtomicBool::new(false),
            refcount: AtomicUsize::new(1),
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn binder(&self) -> &Arc<SyncDomain> {
        &self.binder
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a new outgoing request preconfigured for this domain's
    /// transport (spec.md §4.7: "`create_request` returns an IORequest
    /// preconfigured for this domain's transport").
    pub fn create_request(&self, object_key: &[u8], operation: u32, flags: crate::request::ResponseFlags) -> Result<Arc<crate::request::IORequest>, SystemException> {
        if self.is_down() {
            return Err(SystemException::new(ExceptionKind::CommFailure, 0, CompletionStatus::No));
        }
        let _ = object_key;
        Ok(crate::request::IORequest::new(operation, flags, crate::stream::StreamOut::new(true)))
    }

    /// Records a locally-owned object this domain has been advertised.
    pub fn own_object(&self, key: Vec<u8>) {
        self.owned_objects.lock().insert(key);
    }

    pub fn owns(&self, key: &[u8]) -> bool {
        self.owned_objects.lock().contains(key)
    }

    pub fn dgc_add_pending(&self, key: Vec<u8>) {
        let mut dgc = self.dgc.lock();
        dgc.live.remove(&key);
        dgc.delete_pending.remove(&key);
        dgc.add_pending.insert(key);
    }

    pub fn dgc_delete_pending(&self, key: Vec<u8>) {
        let mut dgc = self.dgc.lock();
        dgc.add_pending.remove(&key);
        dgc.live.remove(&key);
        dgc.delete_pending.insert(key);
    }

    /// Applies a `complex_ping {adds, dels}` heartbeat (spec.md §4.7):
    /// idempotent — applying the same batch twice is a no-op the second
    /// time (spec.md §8 "Idempotence of DGC").
    pub fn apply_complex_ping(&self, adds: &[Vec<u8>], dels: &[Vec<u8>]) {
        *self.last_heard_from.lock() = Instant::now();
        self.down.store(false, Ordering::Release);
        let mut dgc = self.dgc.lock();
        for key in adds {
            dgc.add_pending.remove(key);
            dgc.live.insert(key.clone());
        }
        for key in dels {
            dgc.live.remove(key);
            dgc.delete_pending.remove(key);
        }
    }

    pub fn is_live(&self, key: &[u8]) -> bool {
        self.dgc.lock().live.contains(key)
    }

    /// Drains the pending-add batch so it can be shipped in a heartbeat
    /// message. On send failure the caller should call
    /// [`Self::revert_add_batch`] to restore it (spec.md §4.7 "DGC add
    /// batch failure").
    pub fn drain_add_batch(&self) -> Vec<Vec<u8>> {
        let mut dgc = self.dgc.lock();
        dgc.add_pending.drain().collect()
    }

    pub fn revert_add_batch(&self, batch: Vec<Vec<u8>>) {
        let mut dgc = self.dgc.lock();
        dgc.add_pending.extend(batch);
    }

    pub fn drain_delete_batch(&self) -> Vec<Vec<u8>> {
        let mut dgc = self.dgc.lock();
        dgc.delete_pending.drain().collect()
    }

    pub fn revert_delete_batch(&self, batch: Vec<Vec<u8>>) {
        let mut dgc = self.dgc.lock();
        dgc.delete_pending.extend(batch);
    }

    /// Marks the peer down if no heartbeat has arrived within
    /// `heartbeat_timeout`. Called from the heartbeat timer.
    pub fn check_heartbeat_timeout(&self) {
        let elapsed = self.last_heard_from.lock().elapsed();
        if elapsed > self.heartbeat_timeout {
            self.down.store(true, Ordering::Release);
        }
    }

    pub fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_port::host::Host;
    use nirvana_sched::Scheduler;

    fn make_domain() -> (Arc<Scheduler>, Arc<Domain>) {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let binder = SyncDomain::new(&scheduler);
        (scheduler.clone(), Domain::with_heartbeat(DomainKind::Remote, binder, Duration::from_millis(20), Duration::from_millis(40)))
    }

    #[test]
    fn complex_ping_is_idempotent() {
        let (scheduler, domain) = make_domain();
        domain.dgc_add_pending(b"o1".to_vec());
        domain.apply_complex_ping(&[b"o1".to_vec()], &[]);
        assert!(domain.is_live(b"o1"));
        let snapshot_before = domain.is_live(b"o1");
        domain.apply_complex_ping(&[b"o1".to_vec()], &[]);
        assert_eq!(domain.is_live(b"o1"), snapshot_before);
        scheduler.shutdown();
    }

    #[test]
    fn heartbeat_timeout_marks_domain_down() {
        let (scheduler, domain) = make_domain();
        assert!(!domain.is_down());
        std::thread::sleep(Duration::from_millis(60));
        domain.check_heartbeat_timeout();
        assert!(domain.is_down());
        scheduler.shutdown();
    }

    #[test]
    fn down_domain_refuses_new_requests() {
        let (scheduler, domain) = make_domain();
        std::thread::sleep(Duration::from_millis(60));
        domain.check_heartbeat_timeout();
        let err = domain.create_request(b"k", 0, crate::request::ResponseFlags::empty()).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::CommFailure);
        scheduler.shutdown();
    }
}
