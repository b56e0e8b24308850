//! Dynamic heap: one or more [`HeapDirectory`]s backed by port-managed
//! pages, plus pooling for the common case of many small, short-lived
//! heaps (one per [`MemContext`](../../nirvana_sched/struct.MemContext.html)).
//!
//! Grounded on spec.md §4.2 and `original_source/Include/Memory.h`'s
//! `Bridge<Memory>` operation set, which `nirvana_port::Memory` mirrors.

use crate::directory::HeapDirectory;
use crate::error::HeapError;
use nirvana_port::{CopyFlags, Memory, QueryParam};
use parking_lot::Mutex;
use std::sync::Arc;

/// Heap geometry: `base` is meaningful only for a single-directory heap
/// pinned at a fixed address; multi-directory heaps track a base per
/// directory internally.
#[derive(Debug, Clone, Copy)]
pub struct HeapInfo {
    pub unit_size: usize,
    pub commit_size: usize,
    pub directory_unit_count: usize,
}

impl HeapInfo {
    fn decommit_level(&self, level_count: usize) -> Option<usize> {
        if self.commit_size <= self.unit_size {
            return None;
        }
        let ratio = self.commit_size / self.unit_size;
        if !ratio.is_power_of_two() {
            return None;
        }
        let shift = ratio.trailing_zeros() as usize;
        (level_count - 1).checked_sub(shift)
    }
}

struct Segment {
    base: usize,
    dir: HeapDirectory,
}

/// A dynamic heap. Allocations at or below `max_block_size` are served
/// from [`HeapDirectory`] segments; larger requests fall through to the
/// port allocator directly, tolerating its half-page overhead (spec.md
/// §4.2).
pub struct Heap {
    info: HeapInfo,
    max_block_size: usize,
    segments: Mutex<Vec<Segment>>,
    memory: Arc<dyn Memory>,
    pool: Option<Arc<HeapPool>>,
}

impl Heap {
    pub fn new(memory: Arc<dyn Memory>, info: HeapInfo) -> Self {
        assert!(info.directory_unit_count.is_power_of_two());
        Self {
            max_block_size: info.directory_unit_count * info.unit_size,
            info,
            segments: Mutex::new(Vec::new()),
            memory,
            pool: None,
        }
    }

    fn with_pool(memory: Arc<dyn Memory>, info: HeapInfo, pool: Arc<HeapPool>) -> Self {
        Self {
            max_block_size: info.directory_unit_count * info.unit_size,
            info,
            segments: Mutex::new(Vec::new()),
            memory,
            pool: Some(pool),
        }
    }

    pub fn empty(&self) -> bool {
        self.segments.lock().iter().all(|s| s.dir.empty())
    }

    fn units_for(&self, size: usize) -> usize {
        (size + self.info.unit_size - 1) / self.info.unit_size
    }

    pub fn allocate(&self, size: usize) -> Result<usize, HeapError> {
        if size == 0 {
            return Err(HeapError::TooLarge);
        }
        if size > self.max_block_size {
            return Ok(self.memory.allocate(0, size, CopyFlags::ALLOCATE | CopyFlags::ZERO_INIT)?);
        }
        let units = self.units_for(size);
        let mut segments = self.segments.lock();
        for seg in segments.iter() {
            if let Ok(off) = seg.dir.allocate(units) {
                return Ok(seg.base + off * self.info.unit_size);
            }
        }
        let region_bytes = self.info.directory_unit_count * self.info.unit_size;
        let base = self.memory.allocate(0, region_bytes, CopyFlags::ALLOCATE)?;
        let level_count = self.info.directory_unit_count.trailing_zeros() as usize + 1;
        let dir = HeapDirectory::new(self.info.directory_unit_count, self.info.decommit_level(level_count));
        let off = dir.allocate(units)?;
        let addr = base + off * self.info.unit_size;
        segments.push(Segment { base, dir });
        Ok(addr)
    }

    pub fn release(&self, ptr: usize, size: usize) -> Result<(), HeapError> {
        if size > self.max_block_size {
            return Ok(self.memory.release(ptr, size)?);
        }
        let units = self.units_for(size);
        let segments = self.segments.lock();
        let seg = segments
            .iter()
            .find(|s| ptr >= s.base && ptr < s.base + self.info.directory_unit_count * self.info.unit_size)
            .ok_or(HeapError::OutOfRange)?;
        let begin = (ptr - seg.base) / self.info.unit_size;
        let decommits = seg.dir.release(begin, begin + units)?;
        for (off, unit_len) in decommits {
            self.memory.decommit(seg.base + off * self.info.unit_size, unit_len * self.info.unit_size)?;
        }
        Ok(())
    }

    pub fn commit(&self, ptr: usize, size: usize) -> Result<(), HeapError> {
        Ok(self.memory.commit(ptr, size)?)
    }

    pub fn decommit(&self, ptr: usize, size: usize) -> Result<(), HeapError> {
        Ok(self.memory.decommit(ptr, size)?)
    }

    /// Copy with `READ_ONLY | SRC_RELEASE` becomes a port-level
    /// copy-on-write remap when supported; otherwise a physical copy —
    /// the port implementation decides, this call is a passthrough.
    pub fn copy(&self, dst: usize, src: usize, size: usize, flags: CopyFlags) -> Result<usize, HeapError> {
        Ok(self.memory.copy(dst, src, size, flags)?)
    }

    pub fn is_private(&self, ptr: usize) -> bool {
        self.memory.is_private(ptr)
    }

    pub fn query(&self, ptr: usize, param: QueryParam) -> usize {
        self.memory.query(ptr, param)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            if self.empty() && self.segments.lock().len() <= 1 {
                pool.recycle(std::mem::replace(
                    &mut self.segments,
                    Mutex::new(Vec::new()),
                ));
                return;
            }
        }
        for seg in self.segments.get_mut().drain(..) {
            let region_bytes = self.info.directory_unit_count * self.info.unit_size;
            let _ = self.memory.release(seg.base, region_bytes);
        }
    }
}

/// Free list of small, fully-released heap segments, avoiding a port
/// reservation for every short-lived [`MemContext`] heap (spec.md §4.2:
/// "destroyed heaps return to a free list to avoid repeated port
/// reservations").
pub struct HeapPool {
    info: HeapInfo,
    memory: Arc<dyn Memory>,
    free: Mutex<Vec<Mutex<Vec<Segment>>>>,
    capacity: usize,
}

impl HeapPool {
    pub fn new(memory: Arc<dyn Memory>, info: HeapInfo, capacity: usize) -> Arc<Self> {
        Arc::new(Self { info, memory, free: Mutex::new(Vec::new()), capacity })
    }

    /// Returns a heap from the free list when one is available, otherwise
    /// a fresh one backed by a lazily-created directory.
    pub fn acquire(self: &Arc<Self>) -> Heap {
        if let Some(segments) = self.free.lock().pop() {
            return Heap {
                info: self.info,
                max_block_size: self.info.directory_unit_count * self.info.unit_size,
                segments,
                memory: self.memory.clone(),
                pool: Some(self.clone()),
            };
        }
        Heap::with_pool(self.memory.clone(), self.info, self.clone())
    }

    fn recycle(&self, segments: Mutex<Vec<Segment>>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(segments);
        } else {
            for seg in segments.into_inner() {
                let region_bytes = self.info.directory_unit_count * self.info.unit_size;
                let _ = self.memory.release(seg.base, region_bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirvana_port::host::HostMemory;

    fn info() -> HeapInfo {
        HeapInfo { unit_size: 16, commit_size: 64, directory_unit_count: 64 }
    }

    #[test]
    fn small_allocations_come_from_a_directory_segment() {
        let memory: Arc<dyn Memory> = Arc::new(HostMemory::default());
        let heap = Heap::new(memory, info());
        let p1 = heap.allocate(32).unwrap();
        let p2 = heap.allocate(32).unwrap();
        assert_ne!(p1, p2);
        heap.release(p1, 32).unwrap();
        heap.release(p2, 32).unwrap();
        assert!(heap.empty());
    }

    #[test]
    fn oversize_allocation_falls_through_to_port() {
        let memory: Arc<dyn Memory> = Arc::new(HostMemory::default());
        let heap = Heap::new(memory, info());
        let big = heap.max_block_size + 1;
        let p = heap.allocate(big).unwrap();
        heap.release(p, big).unwrap();
    }

    #[test]
    fn pooled_heap_is_recycled_on_drop() {
        let memory: Arc<dyn Memory> = Arc::new(HostMemory::default());
        let pool = HeapPool::new(memory, info(), 4);
        {
            let heap = pool.acquire();
            let p = heap.allocate(16).unwrap();
            heap.release(p, 16).unwrap();
        }
        assert_eq!(pool.free.lock().len(), 1);
        let _heap2 = pool.acquire();
        assert_eq!(pool.free.lock().len(), 0);
    }
}
