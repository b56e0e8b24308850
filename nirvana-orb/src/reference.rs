//! Local and remote object references (spec.md §4.7).

use crate::domain::Domain;
use crate::ior::TaggedProfile;
use crate::poa::Poa;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Object keys are opaque octet sequences; hashing is byte-wise with a
/// seed (spec.md §6).
pub fn hash_object_key(seed: u64, key: &[u8]) -> u64 {
    let mut h = seed;
    for &b in key {
        h = h.wrapping_mul(0x100000001b3).wrapping_add(b as u64);
    }
    h
}

/// A servant reachable from this process. Holds a weak back-pointer to
/// the activating POA so the POA ↔ Reference ↔ Domain cycle (spec.md §9)
/// can be torn down from the POA's deactivation path without leaking.
pub struct LocalReference {
    pub object_key: Vec<u8>,
    pub primary_interface_id: String,
    poa: Weak<Poa>,
    servant_proxy_id: u64,
    owners: parking_lot::Mutex<Vec<Arc<Domain>>>,
    refcount: AtomicUsize,
}

impl LocalReference {
    pub fn new(object_key: Vec<u8>, primary_interface_id: String, poa: &Arc<Poa>, servant_proxy_id: u64) -> Arc<Self> {
        Arc::new(Self {
            object_key,
            primary_interface_id,
            poa: Arc::downgrade(poa),
            servant_proxy_id,
            owners: parking_lot::Mutex::new(Vec::new()),
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn poa(&self) -> Option<Arc<Poa>> {
        self.poa.upgrade()
    }

    pub fn servant_proxy_id(&self) -> u64 {
        self.servant_proxy_id
    }

    pub fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// On last release the caller is responsible for scheduling teardown
    /// on the Binder's sync context (spec.md §4.7); this only reports
    /// when that threshold was crossed.
    pub fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// First acquisition by domain `d` adds it to the owners set — the
    /// caller is expected to also enqueue the object on `d`'s DGC add
    /// list.
    pub fn acquire_from_domain(&self, domain: &Arc<Domain>) -> bool {
        let mut owners = self.owners.lock();
        if owners.iter().any(|d| Arc::ptr_eq(d, domain)) {
            false
        } else {
            owners.push(domain.clone());
            true
        }
    }

    /// Last release by domain `d` removes it from the owners set — the
    /// caller is expected to also move the object into `d`'s DGC delete
    /// list.
    pub fn release_from_domain(&self, domain: &Arc<Domain>) -> bool {
        let mut owners = self.owners.lock();
        if let Some(pos) = owners.iter().position(|d| Arc::ptr_eq(d, domain)) {
            owners.remove(pos);
            true
        } else {
            false
        }
    }
}

/// A reference to an object owned by a peer ORB instance.
pub struct RemoteReference {
    pub domain: Weak<Domain>,
    pub object_key: Vec<u8>,
    pub address_profiles: Vec<TaggedProfile>,
    pub repository_id: String,
    refcount: AtomicUsize,
}

impl RemoteReference {
    pub fn new(domain: &Arc<Domain>, object_key: Vec<u8>, address_profiles: Vec<TaggedProfile>, repository_id: String) -> Arc<Self> {
        let r = Arc::new(Self {
            domain: Arc::downgrade(domain),
            object_key,
            address_profiles,
            repository_id,
            refcount: AtomicUsize::new(1),
        });
        domain.dgc_add_pending(r.object_key.clone());
        r
    }

    pub fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release(&self) -> bool {
        let hit_zero = self.refcount.fetch_sub(1, Ordering::AcqRel) == 1;
        if hit_zero {
            if let Some(domain) = self.domain.upgrade() {
                domain.dgc_delete_pending(self.object_key.clone());
            }
        }
        hit_zero
    }
}

#[derive(Clone)]
pub enum Reference {
    Local(Arc<LocalReference>),
    Remote(Arc<RemoteReference>),
}

impl Reference {
    pub fn is_local(&self) -> bool {
        matches!(self, Reference::Local(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainKind;
    use nirvana_sched::Scheduler;
    use nirvana_port::host::Host;

    #[test]
    fn object_key_hash_is_deterministic() {
        let a = hash_object_key(7, b"abc");
        let b = hash_object_key(7, b"abc");
        let c = hash_object_key(7, b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn local_reference_tracks_owning_domains() {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let binder = nirvana_sched::SyncDomain::new(&scheduler);
        let domain = Domain::new(DomainKind::Remote, binder);
        let poa = Poa::root();
        let lref = LocalReference::new(b"k1".to_vec(), "IDL:Foo:1.0".into(), &poa, 1);
        assert!(lref.acquire_from_domain(&domain));
        assert!(!lref.acquire_from_domain(&domain));
        assert!(lref.release_from_domain(&domain));
        scheduler.shutdown();
    }
}
