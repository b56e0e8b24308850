//! Runtime bootstrap and teardown sequence (spec.md §9's "ports → heap →
//! scheduler → binder → ORB → NS" ordering). Lives here rather than in
//! `nirvana-core` because this is the one crate allowed to see every
//! layer at once: `nirvana-core` is deliberately dependency-free so that
//! `nirvana-orb` can depend on it without creating a cycle.

use nirvana_core::config::NirvanaConfig;
use nirvana_heap::HeapInfo;
use nirvana_naming::NamingContext;
use nirvana_orb::Poa;
use nirvana_port::host::Host;
use nirvana_port::Memory;
use nirvana_sched::{mem_context, MemContext, Scheduler};
use std::sync::Arc;

/// Everything the bootstrap sequence hands back, in acquisition order so
/// that [`Runtime::shutdown`] can tear it down in reverse.
pub struct Runtime {
    pub host: Host,
    pub scheduler: Arc<Scheduler>,
    pub root_context: Arc<MemContext>,
    pub root_poa: Arc<Poa>,
    pub naming_root: Arc<NamingContext>,
}

impl Runtime {
    /// Brings the kernel up in the documented order:
    /// 1. ports (host memory/sysinfo/timer/debugger)
    /// 2. heap (default pool backing free-standing `MemContext`s)
    /// 3. scheduler (worker threads, ready queue)
    /// 4. binder (the free-context root `MemContext`, standing in for the
    ///    static-module binder until a real loader exists)
    /// 5. ORB (the root POA; per-connection `Domain`/`Reference` state is
    ///    created lazily by `nirvana-orb` as peers connect, not here)
    /// 6. NS (root naming context)
    pub fn bootstrap(config: &NirvanaConfig) -> Self {
        let host = Host::default();

        let memory: Arc<dyn Memory> = host.memory.clone();
        let heap_info = HeapInfo {
            unit_size: config.heap.unit_size,
            commit_size: config.heap.commit_size,
            directory_unit_count: config.heap.directory_unit_count,
        };
        let heap_pool = nirvana_heap::HeapPool::new(memory, heap_info, config.heap.pool_capacity);
        mem_context::init_default_heap_pool(heap_pool);

        let scheduler = Scheduler::start(&*host.sysinfo);

        let root_context = Arc::new(MemContext::standalone());

        let root_poa = Poa::root();

        let naming_root = NamingContext::new();

        tracing::info!("runtime bootstrap complete");
        Self { host, scheduler, root_context, root_poa, naming_root }
    }

    /// Tears down in the reverse of acquisition order: NS and the ORB
    /// layer hold no resources of their own here, so this reduces to
    /// stopping the scheduler; ports and heap are released when `host`
    /// and the heap pool's last `Arc` drop.
    pub fn shutdown(self) {
        self.scheduler.shutdown();
        tracing::info!("runtime shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_then_shutdown_does_not_panic() {
        let config = NirvanaConfig::default();
        let runtime = Runtime::bootstrap(&config);
        assert!(runtime.scheduler.check_unrestricted_creation().is_ok());
        runtime.shutdown();
    }
}
