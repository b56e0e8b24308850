//! Per-`ExecDomain` memory context (spec.md §4.5): current heap,
//! runtime-proxy map, TLS slot table, and current-working-directory name.

use dashmap::DashMap;
use nirvana_heap::{Heap, HeapPool};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, OnceLock};

static DEFAULT_HEAP_POOL: OnceLock<Arc<HeapPool>> = OnceLock::new();

/// Called once at bootstrap (`nirvana-cli`'s `Runtime::bootstrap`) to
/// supply the pool standalone/on-demand `MemContext`s draw their heap
/// from.
pub fn init_default_heap_pool(pool: Arc<HeapPool>) {
    let _ = DEFAULT_HEAP_POOL.set(pool);
}

pub struct MemContext {
    heap: Mutex<Option<Arc<Heap>>>,
    /// Heaps created by user code running in this context, tracked so
    /// they can all be released at teardown. The original keeps an
    /// intrusive linked list through each heap's control block; a plain
    /// `Vec` is the idiomatic Rust substitute since heaps here are
    /// heap-allocated `Arc`s rather than fields of a fixed-size struct.
    user_heaps: Mutex<Vec<Arc<Heap>>>,
    proxies: DashMap<u64, Arc<dyn Any + Send + Sync>>,
    tls: DashMap<usize, Box<dyn Any + Send + Sync>>,
    cwd: Mutex<String>,
}

thread_local! {
    static STANDALONE: std::cell::RefCell<Option<Arc<MemContext>>> = const { std::cell::RefCell::new(None) };
}

impl MemContext {
    /// The calling thread's context: the running `ExecDomain`'s, if any,
    /// otherwise a lazily-created standalone context cached per thread.
    pub fn current() -> Arc<MemContext> {
        if let Some(ed) = crate::current::current() {
            return ed.mem_context.clone();
        }
        STANDALONE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(Arc::new(MemContext::standalone()));
            }
            slot.as_ref().unwrap().clone()
        })
    }

    pub fn standalone() -> Self {
        Self {
            heap: Mutex::new(None),
            user_heaps: Mutex::new(Vec::new()),
            proxies: DashMap::new(),
            tls: DashMap::new(),
            cwd: Mutex::new("/".to_string()),
        }
    }

    /// Returns this context's heap, creating it on demand from the
    /// default pool the first time it's needed.
    pub fn heap(&self) -> Arc<Heap> {
        let mut slot = self.heap.lock();
        if let Some(h) = slot.as_ref() {
            return h.clone();
        }
        let pool = DEFAULT_HEAP_POOL.get().expect("default heap pool not initialized; call init_default_heap_pool at bootstrap");
        let h = Arc::new(pool.acquire());
        *slot = Some(h.clone());
        h
    }

    pub fn register_user_heap(&self, heap: Arc<Heap>) {
        self.user_heaps.lock().push(heap);
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, path: String) {
        *self.cwd.lock() = path;
    }

    pub fn set_proxy(&self, key: u64, proxy: Arc<dyn Any + Send + Sync>) {
        self.proxies.insert(key, proxy);
    }

    pub fn proxy(&self, key: u64) -> Option<Arc<dyn Any + Send + Sync>> {
        self.proxies.get(&key).map(|e| e.clone())
    }

    pub fn set_tls(&self, slot: usize, value: Box<dyn Any + Send + Sync>) {
        self.tls.insert(slot, value);
    }

    pub fn clear_tls(&self, slot: usize) {
        self.tls.remove(&slot);
    }
}

impl Drop for MemContext {
    fn drop(&mut self) {
        // All user heaps linked to this context are released with it
        // (spec.md §4.5); dropping the Arcs runs `Heap::drop`, which
        // releases or recycles their backing segments.
        self.user_heaps.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_heap::HeapInfo;
    use nirvana_port::host::HostMemory;
    use nirvana_port::Memory;

    fn install_pool() {
        let memory: Arc<dyn Memory> = Arc::new(HostMemory::default());
        let info = HeapInfo { unit_size: 16, commit_size: 64, directory_unit_count: 64 };
        let _ = DEFAULT_HEAP_POOL.set(HeapPool::new(memory, info, 4));
    }

    #[test]
    fn heap_is_created_lazily_and_cached() {
        install_pool();
        let ctx = MemContext::standalone();
        let h1 = ctx.heap();
        let h2 = ctx.heap();
        assert!(Arc::ptr_eq(&h1, &h2));
    }

    #[test]
    fn cwd_defaults_to_root_and_is_settable() {
        let ctx = MemContext::standalone();
        assert_eq!(ctx.cwd(), "/");
        ctx.set_cwd("/tmp".to_string());
        assert_eq!(ctx.cwd(), "/tmp");
    }
}
