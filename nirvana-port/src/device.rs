//! `Port` asynchronous block device, consumed by `nirvana-file::FileAccessDirect`.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("I/O error, errno {0}")]
    Errno(i32),
    #[error("operation cancelled")]
    Cancelled,
    #[error("device does not support the requested block alignment")]
    Alignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// Outcome of a completed port I/O request, delivered by whatever thread
/// drives the underlying device; `FileAccessDirect` integrates the
/// completion at a point that acts as an ordering barrier (spec.md §5).
#[derive(Debug, Clone)]
pub struct IoCompletion {
    pub op: IoOp,
    /// Byte offset within the device this request covered.
    pub offset: u64,
    /// Number of bytes actually transferred before `error`, if any.
    pub transferred: usize,
    pub error: Option<DeviceError>,
}

/// A block-addressable asynchronous device. `base_block_size` must be a
/// power of two; reads and writes are always issued in multiples of it.
pub trait AsyncDevice: Send + Sync {
    fn base_block_size(&self) -> usize;

    /// Current device size in bytes.
    fn size(&self) -> u64;

    /// Request the device be truncated/extended to `new_size`. Only one
    /// truncate may be in flight at a time (spec.md §4.10).
    fn truncate(&self, new_size: u64) -> Result<(), DeviceError>;

    /// Issue an asynchronous read of `buf.len()` bytes (a multiple of
    /// `base_block_size`) starting at `offset`, invoking `on_complete`
    /// exactly once when done.
    fn read(
        &self,
        offset: u64,
        buf: Arc<parking_lot::Mutex<Vec<u8>>>,
        on_complete: Box<dyn FnOnce(IoCompletion) + Send>,
    );

    /// Issue an asynchronous write of `data` at `offset`.
    fn write(&self, offset: u64, data: Vec<u8>, on_complete: Box<dyn FnOnce(IoCompletion) + Send>);

    /// Best-effort cancellation of in-flight requests at `offset`.
    fn cancel(&self, offset: u64);
}
