//! Portable Object Adapter and Active Object Map (spec.md §4.8).

use crate::reference::LocalReference;
use crate::servant_proxy::ServantProxyTable;
use nirvana_core::exception::{CompletionStatus, ExceptionKind, SystemException};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoaPolicies: u32 {
        const UNIQUE_ID               = 0x001;
        const MULTIPLE_ID             = 0x002;
        const SYSTEM_ID               = 0x004;
        const USER_ID                 = 0x008;
        const RETAIN                  = 0x010;
        const NON_RETAIN              = 0x020;
        const IMPLICIT_ACTIVATION     = 0x040;
        const NO_IMPLICIT_ACTIVATION  = 0x080;
        const USE_ACTIVE_OBJECT_MAP_ONLY = 0x100;
        const USE_DEFAULT_SERVANT     = 0x200;
        const USE_SERVANT_MANAGER     = 0x400;
    }
}

impl Default for PoaPolicies {
    fn default() -> Self {
        Self::UNIQUE_ID | Self::SYSTEM_ID | Self::RETAIN | Self::NO_IMPLICIT_ACTIVATION | Self::USE_ACTIVE_OBJECT_MAP_ONLY
    }
}

pub type ObjectId = Vec<u8>;

#[derive(Debug, thiserror::Error)]
pub enum PoaError {
    #[error("servant already active")]
    ServantAlreadyActive,
    #[error("object already active")]
    ObjectAlreadyActive,
    #[error("object not active")]
    ObjectNotActive,
    #[error("POA requires SYSTEM_ID for this operation")]
    WrongPolicy,
    #[error("POA has been destroyed")]
    AdapterInactive,
}

impl From<PoaError> for SystemException {
    fn from(e: PoaError) -> Self {
        let kind = match e {
            PoaError::ObjectNotActive => ExceptionKind::ObjectNotExist,
            PoaError::AdapterInactive => ExceptionKind::ObjAdapter,
            _ => ExceptionKind::BadParam,
        };
        SystemException::new(kind, 0, CompletionStatus::No)
    }
}

fn servant_key(s: &Arc<dyn Any + Send + Sync>) -> usize {
    Arc::as_ptr(s) as *const () as usize
}

/// Maps `ObjectId → local Reference`. Values are strongly owned; entries
/// also index by servant identity to support `UNIQUE_ID`'s "servant
/// already active" check in O(1).
pub struct Poa {
    pub policies: PoaPolicies,
    next_oid: AtomicU64,
    oid_salt: u64,
    aom: RwLock<HashMap<ObjectId, Arc<LocalReference>>>,
    servant_to_oid: Mutex<HashMap<usize, ObjectId>>,
    pub proxies: ServantProxyTable,
    destroyed: AtomicBool,
}

impl Poa {
    pub fn new(policies: PoaPolicies, oid_salt: u64) -> Arc<Self> {
        Arc::new(Self {
            policies,
            next_oid: AtomicU64::new(1),
            oid_salt,
            aom: RwLock::new(HashMap::new()),
            servant_to_oid: Mutex::new(HashMap::new()),
            proxies: ServantProxyTable::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn root() -> Arc<Self> {
        Self::new(PoaPolicies::default(), 0)
    }

    fn check_alive(&self) -> Result<(), PoaError> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(PoaError::AdapterInactive)
        } else {
            Ok(())
        }
    }

    fn fresh_oid(&self) -> ObjectId {
        let n = self.next_oid.fetch_add(1, Ordering::Relaxed);
        (n ^ self.oid_salt).to_le_bytes().to_vec()
    }

    /// Generates a fresh oid and inserts `(oid, servant)`. Requires
    /// `SYSTEM_ID`; for `UNIQUE_ID` the servant must not already be
    /// active.
    pub fn activate_object(&self, servant: Arc<dyn Any + Send + Sync>, interface_id: &str, sync_ctx: &Arc<nirvana_sched::SyncDomain>, self_arc: &Arc<Poa>) -> Result<ObjectId, PoaError> {
        self.check_alive()?;
        if !self.policies.contains(PoaPolicies::SYSTEM_ID) {
            return Err(PoaError::WrongPolicy);
        }
        let key = servant_key(&servant);
        if self.policies.contains(PoaPolicies::UNIQUE_ID) && self.servant_to_oid.lock().contains_key(&key) {
            return Err(PoaError::ServantAlreadyActive);
        }
        let oid = self.fresh_oid();
        self.insert(oid.clone(), servant, interface_id, sync_ctx, self_arc);
        Ok(oid)
    }

    /// Requires the oid not already bound; `UNIQUE_ID` also requires the
    /// servant not bound elsewhere.
    pub fn activate_object_with_id(&self, oid: ObjectId, servant: Arc<dyn Any + Send + Sync>, interface_id: &str, sync_ctx: &Arc<nirvana_sched::SyncDomain>, self_arc: &Arc<Poa>) -> Result<(), PoaError> {
        self.check_alive()?;
        if self.aom.read().contains_key(&oid) {
            return Err(PoaError::ObjectAlreadyActive);
        }
        let key = servant_key(&servant);
        if self.policies.contains(PoaPolicies::UNIQUE_ID) && self.servant_to_oid.lock().contains_key(&key) {
            return Err(PoaError::ServantAlreadyActive);
        }
        self.insert(oid, servant, interface_id, sync_ctx, self_arc);
        Ok(())
    }

    fn insert(&self, oid: ObjectId, servant: Arc<dyn Any + Send + Sync>, interface_id: &str, sync_ctx: &Arc<nirvana_sched::SyncDomain>, self_arc: &Arc<Poa>) {
        let proxy = self.proxies.servant2object(servant, sync_ctx);
        proxy.bind_poa(self_arc);
        let lref = LocalReference::new(oid.clone(), interface_id.to_string(), self_arc, proxy.id);
        self.servant_to_oid.lock().insert(servant_key(&proxy.servant), oid.clone());
        self.aom.write().insert(oid, lref);
    }

    /// Removes the AOM entry. Etherealization (via a configured
    /// ServantActivator) is the caller's responsibility to schedule on
    /// the servant's sync context — this call only performs the map
    /// surgery.
    pub fn deactivate_object(&self, oid: &ObjectId) -> Result<Arc<LocalReference>, PoaError> {
        let removed = self.aom.write().remove(oid).ok_or(PoaError::ObjectNotActive)?;
        self.servant_to_oid.lock().retain(|_, v| v != oid);
        Ok(removed)
    }

    pub fn id_to_servant(&self, oid: &ObjectId) -> Result<Arc<dyn Any + Send + Sync>, PoaError> {
        let lref = self.aom.read().get(oid).cloned().ok_or(PoaError::ObjectNotActive)?;
        self.proxies
            .by_id_servant(lref.servant_proxy_id())
            .ok_or(PoaError::ObjectNotActive)
    }

    pub fn servant_to_id(&self, servant: &Arc<dyn Any + Send + Sync>) -> Result<ObjectId, PoaError> {
        self.servant_to_oid.lock().get(&servant_key(servant)).cloned().ok_or(PoaError::ObjectNotActive)
    }

    pub fn reference_to_servant(&self, lref: &Arc<LocalReference>) -> Result<Arc<dyn Any + Send + Sync>, PoaError> {
        self.id_to_servant(&lref.object_key)
    }

    pub fn servant_to_reference(&self, servant: &Arc<dyn Any + Send + Sync>) -> Result<Arc<LocalReference>, PoaError> {
        let oid = self.servant_to_id(servant)?;
        self.aom.read().get(&oid).cloned().ok_or(PoaError::ObjectNotActive)
    }

    pub fn active_count(&self) -> usize {
        self.aom.read().len()
    }

    /// Marks the POA destroyed; new invocations through it should be
    /// rejected by the caller from this point. Etherealization and AOM
    /// release are left to the caller, which is expected to drain
    /// outstanding invocations first (spec.md §4.8).
    pub fn begin_destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn clear_aom(&self) -> Vec<(ObjectId, Arc<LocalReference>)> {
        let mut aom = self.aom.write();
        self.servant_to_oid.lock().clear();
        aom.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_port::host::Host;
    use nirvana_sched::Scheduler;

    #[test]
    fn activate_then_deactivate_round_trips() {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let ctx = nirvana_sched::SyncDomain::new(&scheduler);
        let poa = Poa::root();
        let servant: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        let oid = poa.activate_object(servant.clone(), "IDL:Foo:1.0", &ctx, &poa).unwrap();
        assert_eq!(poa.active_count(), 1);
        assert_eq!(poa.servant_to_id(&servant).unwrap(), oid);
        poa.deactivate_object(&oid).unwrap();
        assert_eq!(poa.active_count(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn unique_id_rejects_double_activation_of_same_servant() {
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let ctx = nirvana_sched::SyncDomain::new(&scheduler);
        let poa = Poa::root();
        let servant: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        poa.activate_object(servant.clone(), "IDL:Foo:1.0", &ctx, &poa).unwrap();
        let err = poa.activate_object(servant, "IDL:Foo:1.0", &ctx, &poa).unwrap_err();
        assert!(matches!(err, PoaError::ServantAlreadyActive));
        scheduler.shutdown();
    }

    #[test]
    fn destroyed_poa_reports_as_destroyed() {
        let poa = Poa::root();
        assert!(!poa.is_destroyed());
        poa.begin_destroy();
        assert!(poa.is_destroyed());
    }
}
