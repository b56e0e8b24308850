//! Cooperative sync domains, preemptive cross-domain scheduling, and
//! per-`ExecDomain` memory contexts (spec.md §4.4, §4.5).

pub mod current;
pub mod error;
pub mod event;
pub mod exec_domain;
pub mod mem_context;
pub mod scheduler;
pub mod suspend;
pub mod sync_domain;

pub use error::SchedError;
pub use event::Event;
pub use exec_domain::{DeadlinePolicy, EdState, ExecDomain};
pub use mem_context::MemContext;
pub use scheduler::Scheduler;
pub use sync_domain::SyncDomain;

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_heap::HeapInfo;
    use nirvana_port::host::{Host, HostMemory};
    use nirvana_port::Memory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn install_pool() {
        let memory: Arc<dyn Memory> = Arc::new(HostMemory::default());
        let info = HeapInfo { unit_size: 16, commit_size: 64, directory_unit_count: 64 };
        let _ = mem_context::init_default_heap_pool(nirvana_heap::HeapPool::new(memory, info, 4));
    }

    #[test]
    fn free_context_runs_enqueued_work() {
        install_pool();
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let counter = Arc::new(AtomicU32::new(0));
        let c2 = counter.clone();
        let ctx = Arc::new(MemContext::standalone());
        let ed = ExecDomain::new(DeadlinePolicy::Oneway, ctx, Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        scheduler.schedule(ed, None);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[test]
    fn sync_domain_serializes_its_execution_domains() {
        install_pool();
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let sync_domain = SyncDomain::new(&scheduler);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5u32 {
            let order = order.clone();
            let ctx = Arc::new(MemContext::standalone());
            let ed = ExecDomain::new(DeadlinePolicy::Oneway, ctx, Box::new(move || {
                order.lock().push(i);
                std::thread::sleep(Duration::from_millis(5));
            }));
            scheduler.schedule(ed, Some(sync_domain.clone()));
        }
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(order.lock().len(), 5);
        scheduler.shutdown();
    }

    #[test]
    fn suspending_an_ed_lets_a_sibling_on_the_same_sync_domain_run() {
        install_pool();
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        let sync_domain = SyncDomain::new(&scheduler);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gate = Arc::new(Event::new());

        let order1 = order.clone();
        let gate1 = gate.clone();
        let ctx1 = Arc::new(MemContext::standalone());
        let suspending = ExecDomain::new(DeadlinePolicy::Oneway, ctx1, Box::new(move || {
            order1.lock().push("ed1-start");
            suspend::wait(&gate1);
            order1.lock().push("ed1-resume");
        }));
        scheduler.schedule(suspending, Some(sync_domain.clone()));

        // Give ed1 time to reach its suspension point before enqueuing
        // the sibling — without a released pin this would deadlock
        // behind ed1 until `gate` is signalled.
        std::thread::sleep(Duration::from_millis(50));

        let order2 = order.clone();
        let ctx2 = Arc::new(MemContext::standalone());
        let sibling = ExecDomain::new(DeadlinePolicy::Oneway, ctx2, Box::new(move || {
            order2.lock().push("ed2-run");
        }));
        scheduler.schedule(sibling, Some(sync_domain.clone()));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*order.lock(), vec!["ed1-start", "ed2-run"], "ed2 must run while ed1 is suspended");

        gate.signal();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*order.lock(), vec!["ed1-start", "ed2-run", "ed1-resume"]);
        scheduler.shutdown();
    }

    #[test]
    fn restricted_mode_blocks_unrestricted_creation_check() {
        install_pool();
        let host = Host::default();
        let scheduler = Scheduler::start(&*host.sysinfo);
        assert!(scheduler.check_unrestricted_creation().is_ok());
        scheduler.enter_restricted_mode();
        assert!(scheduler.check_unrestricted_creation().is_err());
        scheduler.shutdown();
    }
}
