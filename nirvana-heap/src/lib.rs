//! Lock-free buddy-bitmap-pyramid heap allocator.
//!
//! [`directory::HeapDirectory`] is the fixed-size control block; [`Heap`]
//! composes one or more directories with a [`nirvana_port::Memory`] port
//! to back a growable, reference-counted dynamic heap, optionally pooled
//! via [`heap::HeapPool`] for short-lived per-[`MemContext`] heaps.

pub mod bitmap;
pub mod directory;
pub mod error;
pub mod heap;

pub use directory::HeapDirectory;
pub use error::HeapError;
pub use heap::{Heap, HeapInfo, HeapPool};
