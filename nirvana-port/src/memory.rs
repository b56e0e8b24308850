//! `Port::Memory` — page-level memory management.
//!
//! Grounded on `original_source/Include/Memory.h`'s `Bridge<Memory>` EPV:
//! `allocate` / `commit` / `decommit` / `release` / `copy` / `is_private` /
//! `is_copy` / `query`, and the `QueryParam` / flags enums it declares.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Allocation / copy flags. Values track the C++ `Bridge<Memory>` enum
    /// (`READ_WRITE`, `READ_ONLY`, `RESERVED`, `ALLOCATE`, `DECOMMIT`,
    /// `RELEASE`, `ZERO_INIT`, `EXACTLY`) so port implementations can be
    /// diffed against the original bit values if needed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CopyFlags: u32 {
        const READ_ONLY   = 0x01;
        const RESERVED    = 0x02;
        const ALLOCATE    = 0x08;
        const DECOMMIT    = 0x10;
        const RELEASE     = 0x30;
        const ZERO_INIT   = 0x40;
        const EXACTLY     = 0x80;
        /// Source block may be released once the copy completes
        /// (enables copy-on-write remap instead of a physical copy).
        const SRC_RELEASE = 0x100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        const HARDWARE_PROTECTION = 0x0001;
        const COPY_ON_WRITE       = 0x0002;
        const SPACE_RESERVATION   = 0x0004;
        const ACCESS_CHECK        = 0x0008;
    }
}

/// Host page-level parameters queryable via [`Memory::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryParam {
    AllocationUnit,
    ProtectionUnit,
    CommitUnit,
    SharingUnit,
    SharingAssociativity,
    Granularity,
    Flags,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no memory available")]
    NoMemory,
    #[error("invalid address range")]
    BadParam,
    #[error("attempt to commit a range that was never reserved")]
    NotReserved,
}

/// Page-level memory port. A `nirvana-heap::Heap` commits/decommits through
/// this trait; it never allocates raw OS memory itself.
pub trait Memory: Send + Sync {
    /// Reserve (and optionally commit, via `flags & ALLOCATE`) a range.
    /// `dst == 0` means "anywhere"; a non-zero `dst` with `EXACTLY` requires
    /// that exact address.
    fn allocate(&self, dst: usize, size: usize, flags: CopyFlags) -> Result<usize, MemoryError>;

    /// Commit previously reserved pages, making them readable/writable.
    fn commit(&self, dst: usize, size: usize) -> Result<(), MemoryError>;

    /// Decommit pages, returning physical backing to the host without
    /// releasing the address range.
    fn decommit(&self, dst: usize, size: usize) -> Result<(), MemoryError>;

    /// Release a previously reserved range entirely.
    fn release(&self, dst: usize, size: usize) -> Result<(), MemoryError>;

    /// Copy `size` bytes from `src` to `dst`. When the host supports
    /// copy-on-write remapping and `flags` contains `READ_ONLY |
    /// SRC_RELEASE`, this should be a page remap rather than a physical
    /// copy; [`Memory::is_copy`] lets callers detect which happened.
    fn copy(&self, dst: usize, src: usize, size: usize, flags: CopyFlags) -> Result<usize, MemoryError>;

    /// True if `p` is not shared with any other context (i.e. it is safe
    /// to write in place without triggering copy-on-write).
    fn is_private(&self, p: usize) -> bool;

    /// True if `[p1, p1+size)` and `[p2, p2+size)` are a copy-on-write
    /// sharing of the same physical pages.
    fn is_copy(&self, p1: usize, p2: usize, size: usize) -> bool;

    /// Query a host page-level parameter.
    fn query(&self, p: usize, param: QueryParam) -> usize;
}
