//! Deadline-ordered priority queue for the scheduler's ready queues.
//!
//! Grounded on `original_source/Source/PriorityQueue.h`: keys are
//! `(deadline, tiebreaker)` pairs, lexicographically ordered, with
//! `insert` / `delete_min` / `erase` / `get_min_deadline` / `empty`. The
//! original hand-rolls a Fraser/Sundell lock-free skip list with low-bit
//! pointer tagging for deletion marks; here that role is played by
//! [`crossbeam_skiplist::SkipMap`], whose `remove` already gives the
//! wait-free-read, lock-free-write guarantees the original's tagging
//! scheme was built to provide, without unsafe pointer games.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// `(deadline, tiebreaker)`, ordered first by deadline then by insertion
/// order — spec.md §4.4: "ties broken by creation counter".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub deadline: u64,
    pub tiebreaker: u64,
}

/// Monotonic counter handing out tiebreakers, mirroring
/// `nirvana_port::timer::CreationCounter` but kept local so this crate has
/// no port dependency.
#[derive(Default)]
pub struct Tiebreaker(AtomicU64);

impl Tiebreaker {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A deadline-ordered queue of `Val`. `MAX_LEVEL` in the original bounds
/// the skip list's tower height; `SkipMap` manages its own levelling
/// internally, so it is not a tunable here.
pub struct PriorityQueue<Val> {
    map: SkipMap<Key, Val>,
    tiebreaker: Tiebreaker,
}

impl<Val: Send + Sync + Clone + 'static> Default for PriorityQueue<Val> {
    fn default() -> Self {
        Self { map: SkipMap::new(), tiebreaker: Tiebreaker::default() }
    }
}

impl<Val: Send + Sync + Clone + 'static> PriorityQueue<Val> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Allocates a fresh tiebreaker and inserts `(deadline, value)`,
    /// returning the full key so the caller can `erase` it later (e.g. on
    /// cancellation).
    pub fn insert(&self, deadline: u64, value: Val) -> Key {
        let key = Key { deadline, tiebreaker: self.tiebreaker.next() };
        self.map.insert(key, value);
        key
    }

    /// Insert under a caller-supplied key, for callers (like
    /// `FileLockQueue`) that need to re-derive the same key to `erase` an
    /// entry without round-tripping through the queue.
    pub fn insert_with_key(&self, key: Key, value: Val) {
        self.map.insert(key, value);
    }

    pub fn get_min_deadline(&self) -> Option<u64> {
        self.map.front().map(|e| e.key().deadline)
    }

    /// Removes and returns the minimum-keyed entry.
    pub fn delete_min(&self) -> Option<(Key, Val)> {
        self.map.pop_front().map(|e| (*e.key(), e.value_owned_workaround()))
    }

    /// Removes a specific entry previously returned by [`insert`].
    pub fn erase(&self, key: Key) -> Option<Val> {
        self.map.remove(&key).map(|e| e.value_owned_workaround())
    }
}

/// `crossbeam_skiplist`'s `Entry::value()` borrows from the map; callers
/// that need an owned `Val` out of an `Entry` being removed must clone.
/// Kept as a small private extension trait so call sites above read
/// naturally.
trait EntryValueOwned<Val> {
    fn value_owned_workaround(&self) -> Val;
}

impl<Val: Clone> EntryValueOwned<Val> for crossbeam_skiplist::map::Entry<'_, Key, Val> {
    fn value_owned_workaround(&self) -> Val {
        self.value().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_min_returns_lowest_deadline_first() {
        let q: PriorityQueue<&'static str> = PriorityQueue::new();
        q.insert(30, "c");
        q.insert(10, "a");
        q.insert(20, "b");
        assert_eq!(q.delete_min().unwrap().1, "a");
        assert_eq!(q.delete_min().unwrap().1, "b");
        assert_eq!(q.delete_min().unwrap().1, "c");
        assert!(q.is_empty());
    }

    #[test]
    fn equal_deadlines_are_fifo_by_tiebreaker() {
        let q: PriorityQueue<u32> = PriorityQueue::new();
        q.insert(5, 1);
        q.insert(5, 2);
        q.insert(5, 3);
        assert_eq!(q.delete_min().unwrap().1, 1);
        assert_eq!(q.delete_min().unwrap().1, 2);
        assert_eq!(q.delete_min().unwrap().1, 3);
    }

    #[test]
    fn erase_removes_a_specific_entry() {
        let q: PriorityQueue<&'static str> = PriorityQueue::new();
        let key_a = q.insert(1, "a");
        q.insert(2, "b");
        assert_eq!(q.erase(key_a), Some("a"));
        assert_eq!(q.get_min_deadline(), Some(2));
    }

    #[test]
    fn get_min_deadline_on_empty_queue() {
        let q: PriorityQueue<u32> = PriorityQueue::new();
        assert_eq!(q.get_min_deadline(), None);
    }

    /// Cross-checks 1000 pseudo-random inserts against
    /// `std::collections::BinaryHeap` as the reference min-heap: draining
    /// both in lockstep must yield the same order (spec.md §8's "for all
    /// interleavings of N inserts, delete_min order matches a reference
    /// min-heap").
    #[test]
    fn matches_reference_min_heap_over_1000_inserts() {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let q: PriorityQueue<u64> = PriorityQueue::new();
        let mut reference: BinaryHeap<Reverse<Key>> = BinaryHeap::new();
        let mut state: u64 = 0x2545F4914F6CDD1D;
        for i in 0..1000u64 {
            // xorshift64*, deterministic and dependency-free.
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let deadline = state.wrapping_mul(0x2545F4914F6CDD1D) % 100;
            let key = q.insert(deadline, i);
            reference.push(Reverse(key));
        }
        while let Some(Reverse(expected_key)) = reference.pop() {
            let (key, _) = q.delete_min().unwrap();
            assert_eq!(key, expected_key);
        }
        assert!(q.is_empty());
    }
}
