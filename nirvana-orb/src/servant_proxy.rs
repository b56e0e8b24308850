//! Servant ↔ object bridge (spec.md §4.9).
//!
//! Every PortableServer servant has at most one proxy. `servant2object`
//! finds or installs it; `object2servant` enforces that the caller is
//! executing inside the servant's sync context.

use nirvana_core::exception::{CompletionStatus, ExceptionKind, SystemException};
use nirvana_sched::SyncDomain;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

pub struct ServantProxy {
    pub id: u64,
    pub servant: Arc<dyn Any + Send + Sync>,
    pub sync_context: Arc<SyncDomain>,
    poa: Mutex<Option<Weak<crate::poa::Poa>>>,
}

impl ServantProxy {
    fn new(servant: Arc<dyn Any + Send + Sync>, sync_context: Arc<SyncDomain>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            servant,
            sync_context,
            poa: Mutex::new(None),
        })
    }

    pub fn bind_poa(&self, poa: &Arc<crate::poa::Poa>) {
        *self.poa.lock() = Some(Arc::downgrade(poa));
    }

    pub fn poa(&self) -> Option<Arc<crate::poa::Poa>> {
        self.poa.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Raises `BAD_INV_ORDER` unless the calling ExecDomain's current
    /// sync domain matches this proxy's servant sync context (spec.md
    /// §4.9: "calling `etherealize` or `postinvoke` from any other
    /// context raises `BAD_INV_ORDER`").
    pub fn require_sync_context(&self, caller: &Arc<SyncDomain>) -> Result<(), SystemException> {
        if Arc::ptr_eq(&self.sync_context, caller) {
            Ok(())
        } else {
            Err(SystemException::new(ExceptionKind::BadInvOrder, 0, CompletionStatus::No))
        }
    }
}

/// Registry mapping each distinct servant to its (at most one) proxy.
/// Grounded in spec.md §4.9's "at most one proxy" invariant; implemented
/// as a `DashMap` keyed by the servant's `Arc` address, matching the
/// rest of the ORB's proxy-table idiom (`MemContext::proxies`).
#[derive(Default)]
pub struct ServantProxyTable {
    by_servant: dashmap::DashMap<usize, Arc<ServantProxy>>,
    by_id: dashmap::DashMap<u64, Arc<ServantProxy>>,
}

impl ServantProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn servant_key(servant: &Arc<dyn Any + Send + Sync>) -> usize {
        Arc::as_ptr(servant) as *const () as usize
    }

    pub fn servant2object(&self, servant: Arc<dyn Any + Send + Sync>, sync_context: &Arc<SyncDomain>) -> Arc<ServantProxy> {
        let key = Self::servant_key(&servant);
        if let Some(existing) = self.by_servant.get(&key) {
            return existing.clone();
        }
        let proxy = ServantProxy::new(servant, sync_context.clone());
        self.by_servant.insert(key, proxy.clone());
        self.by_id.insert(proxy.id, proxy.clone());
        proxy
    }

    /// Returns the servant only if `object_key` is local to this domain
    /// and the caller is in the servant's sync context; otherwise `None`
    /// maps to the caller raising `OBJ_ADAPTER`/`WrongAdapter` (spec.md
    /// §4.9).
    pub fn object2servant(&self, proxy_id: u64, caller: &Arc<SyncDomain>) -> Result<Arc<dyn Any + Send + Sync>, SystemException> {
        let proxy = self
            .by_id
            .get(&proxy_id)
            .ok_or_else(|| SystemException::new(ExceptionKind::ObjectNotExist, 0, CompletionStatus::No))?;
        proxy.require_sync_context(caller)?;
        Ok(proxy.servant.clone())
    }

    /// Looks up a proxy's servant by id without the sync-context check
    /// `object2servant` performs — used internally by the POA, which
    /// already serializes AOM access through its own locking.
    pub fn by_id_servant(&self, proxy_id: u64) -> Option<Arc<dyn Any + Send + Sync>> {
        self.by_id.get(&proxy_id).map(|p| p.servant.clone())
    }

    pub fn remove(&self, proxy_id: u64) {
        if let Some((_, proxy)) = self.by_id.remove(&proxy_id) {
            self.by_servant.remove(&Self::servant_key(&proxy.servant));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_port::host::Host;
    use nirvana_sched::Scheduler;

    #[test]
    fn same_servant_gets_same_proxy() {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let ctx = SyncDomain::new(&scheduler);
        let table = ServantProxyTable::new();
        let servant: Arc<dyn Any + Send + Sync> = Arc::new(42u32);
        let p1 = table.servant2object(servant.clone(), &ctx);
        let p2 = table.servant2object(servant, &ctx);
        assert_eq!(p1.id, p2.id);
        scheduler.shutdown();
    }

    #[test]
    fn object2servant_rejects_wrong_sync_context() {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let owning_ctx = SyncDomain::new(&scheduler);
        let other_ctx = SyncDomain::new(&scheduler);
        let table = ServantProxyTable::new();
        let servant: Arc<dyn Any + Send + Sync> = Arc::new(7u32);
        let proxy = table.servant2object(servant, &owning_ctx);
        let err = table.object2servant(proxy.id, &other_ctx).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::BadInvOrder);
        scheduler.shutdown();
    }
}
