//! `Port::SystemInfo` — environment facts the scheduler needs at bootstrap.

pub trait SystemInfo: Send + Sync {
    /// Number of worker threads the scheduler's pool should start
    /// (spec.md §4.4 "Worker pool").
    fn hardware_concurrency(&self) -> usize;

    /// Process-wide page size, used to size the heap's commit granularity
    /// when a config file does not override it.
    fn page_size(&self) -> usize;
}

/// Reference implementation backed by `num_cpus` and a conventional 4KiB
/// page assumption.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystemInfo;

impl SystemInfo for HostSystemInfo {
    fn hardware_concurrency(&self) -> usize {
        num_cpus::get().max(1)
    }

    fn page_size(&self) -> usize {
        4096
    }
}
