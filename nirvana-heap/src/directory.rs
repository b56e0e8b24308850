//! Bitmap-pyramid buddy allocator over a fixed unit array.
//!
//! Grounded on `original_source/Source/HeapDirectory.h`: a pyramid of
//! levels where level 0 holds a single bit for the whole directory and
//! each successive level halves the block size and doubles the bit count,
//! down to one bit per allocation unit. The merged-levels bit-packing
//! trick the original uses to keep the control block inside a fixed 64KiB
//! region (relevant on the embedded/16-bit targets it also supports) is
//! dropped here — a heap-allocated `Vec<BitmapLevel>` has no such
//! constraint.

use crate::bitmap::{BitmapLevel, FreeCounter, MergeOutcome};
use crate::error::HeapError;

fn largest_pow2_le(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        1usize << (usize::BITS - 1 - x.leading_zeros())
    }
}

pub struct HeapDirectory {
    levels: Vec<BitmapLevel>,
    free_count: Vec<FreeCounter>,
    unit_count: usize,
    /// Level at which a merge should trigger a port `decommit` of the
    /// underlying pages (`HEAP_LEVELS - 1 - log2(commit_size/unit_size)`).
    decommit_level: Option<usize>,
}

impl HeapDirectory {
    /// `unit_count` must be a power of two; it becomes the bit count of
    /// the finest (leaf) level.
    pub fn new(unit_count: usize, decommit_level: Option<usize>) -> Self {
        assert!(unit_count.is_power_of_two(), "unit_count must be a power of two");
        let level_count = unit_count.trailing_zeros() as usize + 1;
        let mut levels = Vec::with_capacity(level_count);
        let mut free_count = Vec::with_capacity(level_count);
        for l in 0..level_count {
            let nbits = 1usize << l;
            levels.push(BitmapLevel::new(nbits, l == 0));
            free_count.push(FreeCounter::new(if l == 0 { 1 } else { 0 }));
        }
        Self { levels, free_count, unit_count, decommit_level }
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn block_size(&self, level: usize) -> usize {
        1usize << (self.level_count() - 1 - level)
    }

    fn level_for_block_size(&self, size: usize) -> usize {
        self.level_count() - 1 - size.trailing_zeros() as usize
    }

    /// True iff the entire directory is a single free block.
    pub fn empty(&self) -> bool {
        self.levels[0].test(0)
    }

    fn is_unit_free(&self, unit: usize) -> bool {
        for (l, level) in self.levels.iter().enumerate() {
            let shift = self.level_count() - 1 - l;
            if level.test(unit >> shift) {
                return true;
            }
        }
        false
    }

    /// True iff every unit in `[begin, end)` is currently allocated (no
    /// covering block, at any level, is free).
    pub fn check_allocated(&self, begin: usize, end: usize) -> bool {
        (begin..end).all(|u| !self.is_unit_free(u))
    }

    /// Allocate `units` contiguous units, rounding up to a power of two.
    /// Returns the unit offset of the allocated block.
    pub fn allocate(&self, units: usize) -> Result<usize, HeapError> {
        let rounded = units.max(1).next_power_of_two();
        if rounded > self.unit_count {
            return Err(HeapError::TooLarge);
        }
        let target_level = self.level_for_block_size(rounded);

        let mut level = None;
        for l in (0..=target_level).rev() {
            if self.free_count[l].acquire() {
                level = Some(l);
                break;
            }
        }
        let mut level = level.ok_or(HeapError::NoMemory)?;
        let mut idx = self.levels[level]
            .clear_rightmost_one()
            .expect("free_count/bitmap inconsistency: counter was positive but no bit was set");

        while level < target_level {
            let child_level = level + 1;
            let left = idx * 2;
            let right = idx * 2 + 1;
            let set = self.levels[child_level].try_set(right);
            debug_assert!(set, "sibling of a freshly split block must not already be free");
            self.free_count[child_level].release();
            idx = left;
            level = child_level;
        }

        Ok(idx * self.block_size(level))
    }

    /// Release `[begin, end)`, merging buddies upward. Returns the unit
    /// ranges whose settling level equals `decommit_level`, if any — the
    /// caller (`Heap`) is responsible for telling the port to decommit
    /// those backing pages.
    pub fn release(&self, begin: usize, end: usize) -> Result<Vec<(usize, usize)>, HeapError> {
        if end > self.unit_count || begin > end {
            return Err(HeapError::OutOfRange);
        }
        let mut to_decommit = Vec::new();
        let mut pos = begin;
        while pos < end {
            let remaining = end - pos;
            let mut size = largest_pow2_le(remaining.min(self.block_size(0)));
            while size > 1 && pos % size != 0 {
                size /= 2;
            }
            let mut level = self.level_for_block_size(size);
            let mut idx = pos / size;
            loop {
                match self.levels[level].set_bit_or_clear_companion(idx)? {
                    MergeOutcome::SetOnly => {
                        self.free_count[level].release();
                        if self.decommit_level == Some(level) {
                            to_decommit.push((idx * self.block_size(level), self.block_size(level)));
                        }
                        break;
                    }
                    MergeOutcome::Merged(parent_idx) => {
                        self.free_count[level].dec();
                        if level == 0 {
                            break;
                        }
                        let parent_level = level - 1;
                        if self.decommit_level == Some(parent_level) {
                            to_decommit.push((parent_idx * self.block_size(parent_level), self.block_size(parent_level)));
                        }
                        level = parent_level;
                        idx = parent_idx;
                    }
                }
            }
            pos += size;
        }
        Ok(to_decommit)
    }

    /// Greedily acquire every unit in `[begin, end)` for a pre-existing
    /// range reservation. On any collision, releases whatever was
    /// acquired so far and fails.
    pub fn allocate_range(&self, begin: usize, end: usize) -> Result<(), HeapError> {
        if end > self.unit_count || begin > end {
            return Err(HeapError::OutOfRange);
        }
        let mut acquired: Vec<(usize, usize)> = Vec::new();
        let mut pos = begin;
        while pos < end {
            let remaining = end - pos;
            let mut size = largest_pow2_le(remaining.min(self.block_size(0)));
            while size > 1 && pos % size != 0 {
                size /= 2;
            }
            let mut acquired_here = None;
            loop {
                let level = self.level_for_block_size(size);
                let idx = pos / size;
                if self.levels[level].try_clear(idx) {
                    self.free_count[level].dec();
                    acquired_here = Some(size);
                    break;
                }
                if size == 1 {
                    break;
                }
                size /= 2;
                while size > 1 && pos % size != 0 {
                    size /= 2;
                }
            }
            match acquired_here {
                Some(size) => {
                    acquired.push((pos, size));
                    pos += size;
                }
                None => {
                    for (off, sz) in acquired {
                        let _ = self.release(off, off + sz);
                    }
                    return Err(HeapError::Collision);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_directory_is_empty() {
        let dir = HeapDirectory::new(16, None);
        assert!(dir.empty());
    }

    #[test]
    fn allocate_then_release_restores_empty() {
        let dir = HeapDirectory::new(16, None);
        let a = dir.allocate(3).unwrap();
        assert_eq!(a % 4, 0, "3 units rounds up to a 4-unit aligned block");
        assert!(!dir.empty());
        dir.release(a, a + 4).unwrap();
        assert!(dir.empty());
    }

    #[test]
    fn fill_every_size_class_then_drain() {
        let unit_count = 64;
        let dir = HeapDirectory::new(unit_count, None);
        let mut blocks = Vec::new();
        let mut last_offset = None;
        for _ in 0..unit_count {
            let off = dir.allocate(1).unwrap();
            if let Some(prev) = last_offset {
                assert!(off > prev, "allocations should return ascending offsets while draining a fresh directory");
            }
            last_offset = Some(off);
            blocks.push(off);
        }
        assert!(dir.allocate(1).is_err());
        for off in blocks {
            dir.release(off, off + 1).unwrap();
        }
        assert!(dir.empty());
    }

    #[test]
    fn range_allocate_then_partial_release_reuses_freed_slot() {
        let dir = HeapDirectory::new(16, None);
        dir.allocate_range(0, 16).unwrap();
        assert!(dir.check_allocated(0, 16));
        dir.release(5, 7).unwrap();
        let mut freed = [dir.allocate(1).unwrap(), dir.allocate(1).unwrap()];
        freed.sort_unstable();
        assert_eq!(freed, [5, 6]);
    }

    #[test]
    fn range_allocate_collision_rolls_back() {
        let dir = HeapDirectory::new(16, None);
        let _ = dir.allocate(4).unwrap();
        assert!(dir.allocate_range(0, 8).is_err());
        // Units outside the colliding range must have been released back.
        assert!(!dir.check_allocated(8, 16));
    }

    #[test]
    fn double_release_returns_free_mem_without_corrupting_the_directory() {
        let dir = HeapDirectory::new(16, None);
        let a = dir.allocate(1).unwrap();
        dir.release(a, a + 1).unwrap();
        assert_eq!(dir.release(a, a + 1), Err(HeapError::FreeMem));
        // The directory is still usable after the rejected release.
        let b = dir.allocate(1).unwrap();
        dir.release(b, b + 1).unwrap();
    }

    #[test]
    fn decommit_level_reports_merged_ranges() {
        let dir = HeapDirectory::new(8, Some(1));
        let a = dir.allocate(2).unwrap();
        let b = dir.allocate(2).unwrap();
        dir.release(a, a + 2).unwrap();
        let decommits = dir.release(b, b + 2).unwrap();
        assert!(!decommits.is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever random mix of block sizes got allocated, releasing
        /// them in reverse (LIFO) order always undoes every split and
        /// merge exactly, leaving the directory empty again.
        #[test]
        fn allocate_then_release_in_reverse_always_returns_to_empty(
            sizes in proptest::collection::vec(prop_oneof![Just(1usize), Just(2usize), Just(4usize)], 1..40),
        ) {
            let dir = HeapDirectory::new(64, None);
            let mut blocks = Vec::new();
            for &sz in &sizes {
                if let Ok(off) = dir.allocate(sz) {
                    blocks.push((off, sz.max(1).next_power_of_two()));
                }
            }
            for (off, rounded) in blocks.into_iter().rev() {
                dir.release(off, off + rounded).unwrap();
            }
            prop_assert!(dir.empty());
        }
    }
}
