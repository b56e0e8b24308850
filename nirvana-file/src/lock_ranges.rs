//! `FileLockRanges` and `FileLockQueue` (spec.md §4.11): SQLite-style
//! range locking over a file's byte-offset space.

use nirvana_port::timer::{DeadlineTime, Timer, TimerHandle};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

/// Whether `requested` can be granted to a caller given `held`, another
/// owner's level over the same span (spec.md §4.11's compatibility
/// rules).
fn compatible(held: LockLevel, requested: LockLevel) -> bool {
    match held {
        LockLevel::None => true,
        LockLevel::Pending | LockLevel::Exclusive => requested == LockLevel::None,
        LockLevel::Reserved => requested <= LockLevel::Shared,
        LockLevel::Shared => requested <= LockLevel::Pending,
    }
}

#[derive(Debug, Clone)]
struct Segment {
    begin: u64,
    end: u64,
    owner: u64,
    level: LockLevel,
}

/// Sorted, non-overlapping-per-owner segments covering the locked
/// portions of a file. Absence of a segment for `(offset, owner)` means
/// `LockLevel::None`.
#[derive(Default)]
pub struct FileLockRanges {
    segments: Mutex<Vec<Segment>>,
}

impl FileLockRanges {
    pub fn new() -> Self {
        Self::default()
    }

    fn overlapping(segments: &[Segment], begin: u64, end: u64) -> impl Iterator<Item = &Segment> {
        segments.iter().filter(move |s| s.begin < end && begin < s.end)
    }

    /// Highest level any *other* owner holds anywhere in `[begin,end)`.
    fn max_foreign_level(segments: &[Segment], begin: u64, end: u64, owner: u64) -> LockLevel {
        Self::overlapping(segments, begin, end)
            .filter(|s| s.owner != owner)
            .map(|s| s.level)
            .max()
            .unwrap_or(LockLevel::None)
    }

    /// Returns the highest level `<= level_max` (and `>= level_min`) that
    /// can be granted to `owner` over `[begin, end)` right now, without
    /// mutating state — used both by `set` and by the retry queue.
    pub fn test(&self, begin: u64, end: u64, level_max: LockLevel, level_min: LockLevel, owner: u64) -> Option<LockLevel> {
        let segments = self.segments.lock();
        let foreign = Self::max_foreign_level(&segments, begin, end, owner);
        let mut level = level_max;
        while level >= level_min {
            if compatible(foreign, level) {
                return Some(level);
            }
            if level == LockLevel::None {
                break;
            }
            level = match level {
                LockLevel::Exclusive => LockLevel::Pending,
                LockLevel::Pending => LockLevel::Reserved,
                LockLevel::Reserved => LockLevel::Shared,
                LockLevel::Shared | LockLevel::None => LockLevel::None,
            };
        }
        None
    }

    /// Grants the highest level in `[level_min, level_max]` compatible
    /// with other owners' locks, writing it into the segment table.
    /// `LockLevel::None` always succeeds and simply clears the caller's
    /// ranges (spec.md §8: "acquiring `NONE` always succeeds").
    pub fn set(&self, begin: u64, end: u64, level_max: LockLevel, level_min: LockLevel, owner: u64) -> Option<LockLevel> {
        let granted = self.test(begin, end, level_max, level_min, owner)?;
        let mut segments = self.segments.lock();
        Self::apply(&mut segments, begin, end, owner, granted);
        Some(granted)
    }

    fn apply(segments: &mut Vec<Segment>, begin: u64, end: u64, owner: u64, level: LockLevel) {
        let mut rebuilt = Vec::with_capacity(segments.len() + 2);
        for seg in segments.drain(..) {
            if seg.owner != owner || seg.end <= begin || seg.begin >= end {
                rebuilt.push(seg);
                continue;
            }
            // Own segment overlapping the window: keep the parts outside
            // the window untouched ("new ranges preserve original levels
            // outside the affected window").
            if seg.begin < begin {
                rebuilt.push(Segment { begin: seg.begin, end: begin, owner, level: seg.level });
            }
            if seg.end > end {
                rebuilt.push(Segment { begin: end, end: seg.end, owner, level: seg.level });
            }
        }
        if level != LockLevel::None {
            rebuilt.push(Segment { begin, end, owner, level });
        }
        rebuilt.sort_by(|a, b| a.begin.cmp(&b.begin).then(a.owner.cmp(&b.owner)));
        Self::coalesce(&mut rebuilt);
        *segments = rebuilt;
    }

    /// Merges adjacent same-owner, same-level segments (spec.md §4.11:
    /// "own overlapping ranges merge when same level").
    fn coalesce(segments: &mut Vec<Segment>) {
        let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
        for seg in segments.drain(..) {
            if let Some(last) = out.last_mut() {
                if last.owner == seg.owner && last.level == seg.level && last.end >= seg.begin {
                    last.end = last.end.max(seg.end);
                    continue;
                }
            }
            out.push(seg);
        }
        *segments = out;
    }

    /// Releases every lock `owner` holds; callers invoke this on proxy
    /// deletion.
    pub fn release_all(&self, owner: u64) {
        let mut segments = self.segments.lock();
        segments.retain(|s| s.owner != owner);
    }

    pub fn level_of(&self, offset: u64, owner: u64) -> LockLevel {
        self.segments
            .lock()
            .iter()
            .find(|s| s.owner == owner && s.begin <= offset && offset < s.end)
            .map(|s| s.level)
            .unwrap_or(LockLevel::None)
    }
}

/// A pending lock request, retried whenever any release/downgrade may
/// have made it grantable, and otherwise woken by its own deadline.
struct QueuedRequest {
    begin: u64,
    end: u64,
    level_max: LockLevel,
    level_min: LockLevel,
    owner: u64,
    deadline: DeadlineTime,
    result: Arc<Mutex<Option<LockLevel>>>,
    done: Arc<nirvana_sched::Event>,
}

/// Timeout-based retry queue keyed by ED deadline (spec.md §4.11).
pub struct FileLockQueue {
    ranges: Arc<FileLockRanges>,
    pending: Mutex<Vec<QueuedRequest>>,
    timer: Arc<dyn Timer>,
}

impl FileLockQueue {
    pub fn new(ranges: Arc<FileLockRanges>, timer: Arc<dyn Timer>) -> Arc<Self> {
        Arc::new(Self { ranges, pending: Mutex::new(Vec::new()), timer })
    }

    /// Attempts the lock immediately; if it cannot be granted and
    /// `deadline` is `Some`, enqueues and blocks the caller until either
    /// a retry succeeds or the deadline passes (reported as
    /// `LockLevel::None`, per spec.md §4.11's "Entries canceled... signal
    /// `LOCK_NONE`").
    pub fn acquire(self: &Arc<Self>, begin: u64, end: u64, level_max: LockLevel, level_min: LockLevel, owner: u64, deadline: Option<DeadlineTime>) -> LockLevel {
        if let Some(level) = self.ranges.set(begin, end, level_max, level_min, owner) {
            return level;
        }
        let Some(deadline) = deadline else {
            return LockLevel::None;
        };
        let result = Arc::new(Mutex::new(None));
        let done = Arc::new(nirvana_sched::Event::new());
        let entry = QueuedRequest { begin, end, level_max, level_min, owner, deadline, result: result.clone(), done: done.clone() };
        self.pending.lock().push(entry);

        let queue = self.clone();
        let _handle: TimerHandle = self.timer.schedule(
            deadline,
            Box::new(move || {
                queue.expire(owner, begin, end);
            }),
        );
        nirvana_sched::suspend::wait(&done);
        let value = *result.lock();
        value.unwrap_or(LockLevel::None)
    }

    fn expire(&self, owner: u64, begin: u64, end: u64) {
        let mut pending = self.pending.lock();
        if let Some(pos) = pending.iter().position(|r| r.owner == owner && r.begin == begin && r.end == end) {
            let entry = pending.remove(pos);
            *entry.result.lock() = Some(LockLevel::None);
            entry.done.signal();
        }
    }

    /// Re-plays every queued request; called after any release or
    /// downgrade. Grants that succeed are removed from the queue and
    /// their waiters woken.
    pub fn retry_all(&self) {
        let mut pending = self.pending.lock();
        let mut still_pending = Vec::with_capacity(pending.len());
        for entry in pending.drain(..) {
            match self.ranges.set(entry.begin, entry.end, entry.level_max, entry.level_min, entry.owner) {
                Some(level) => {
                    *entry.result.lock() = Some(level);
                    entry.done.signal();
                }
                None => still_pending.push(entry),
            }
        }
        *pending = still_pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_always_succeeds() {
        let ranges = FileLockRanges::new();
        assert_eq!(ranges.set(0, 10, LockLevel::None, LockLevel::None, 1), Some(LockLevel::None));
    }

    #[test]
    fn exclusive_fails_while_another_owner_overlaps() {
        let ranges = FileLockRanges::new();
        ranges.set(0, 10, LockLevel::Shared, LockLevel::Shared, 2).unwrap();
        assert_eq!(ranges.set(5, 15, LockLevel::Exclusive, LockLevel::Exclusive, 1), None);
    }

    #[test]
    fn lock_table_scenario_two_shared_then_upgrade_blocks_until_release() {
        let ranges = FileLockRanges::new();
        assert_eq!(ranges.set(0, 10, LockLevel::Shared, LockLevel::Shared, 1), Some(LockLevel::Shared));
        assert_eq!(ranges.set(5, 15, LockLevel::Shared, LockLevel::Shared, 2), Some(LockLevel::Shared));
        // A upgrades [0,10) to EXCLUSIVE: blocked by B's overlapping SHARED.
        assert_eq!(ranges.set(0, 10, LockLevel::Exclusive, LockLevel::Exclusive, 1), None);
        ranges.release_all(2);
        assert_eq!(ranges.set(0, 10, LockLevel::Exclusive, LockLevel::Exclusive, 1), Some(LockLevel::Exclusive));
    }

    #[test]
    fn reserved_by_other_still_permits_shared() {
        let ranges = FileLockRanges::new();
        ranges.set(0, 10, LockLevel::Reserved, LockLevel::Reserved, 1).unwrap();
        assert_eq!(ranges.set(0, 10, LockLevel::Shared, LockLevel::Shared, 2), Some(LockLevel::Shared));
        assert_eq!(ranges.set(0, 10, LockLevel::Reserved, LockLevel::Reserved, 2), None);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Granting the same owner the same level over two adjacent
        /// sub-ranges, in either order, must coalesce into the same
        /// per-offset levels as granting the whole merged range at once.
        #[test]
        fn coalescing_is_independent_of_grant_order(
            begin in 0u64..50,
            mid_offset in 1u64..50,
            len in 1u64..50,
            reversed in any::<bool>(),
        ) {
            let split = begin + mid_offset;
            let end = split + len;
            let owner = 1u64;

            let split_order = FileLockRanges::new();
            if reversed {
                split_order.set(split, end, LockLevel::Shared, LockLevel::Shared, owner).unwrap();
                split_order.set(begin, split, LockLevel::Shared, LockLevel::Shared, owner).unwrap();
            } else {
                split_order.set(begin, split, LockLevel::Shared, LockLevel::Shared, owner).unwrap();
                split_order.set(split, end, LockLevel::Shared, LockLevel::Shared, owner).unwrap();
            }

            let whole_range = FileLockRanges::new();
            whole_range.set(begin, end, LockLevel::Shared, LockLevel::Shared, owner).unwrap();

            for offset in begin..end {
                prop_assert_eq!(split_order.level_of(offset, owner), whole_range.level_of(offset, owner));
            }
        }
    }
}
