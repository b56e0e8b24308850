use nirvana_core::exception::{CompletionStatus, ExceptionKind, SystemException};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("no free block large enough for the request")]
    NoMemory,
    #[error("requested size exceeds the directory's unit capacity")]
    TooLarge,
    #[error("range is out of bounds for this directory")]
    OutOfRange,
    #[error("range reservation collided with an already-allocated block")]
    Collision,
    #[error("underlying port memory error: {0}")]
    Port(#[from] nirvana_port::MemoryError),
    /// A release targeted a block that was already free — a heap
    /// consistency violation, raised rather than panicking so the
    /// domain that triggered it keeps running (spec.md §7).
    #[error("duplicate release: block was already free")]
    FreeMem,
}

impl From<HeapError> for SystemException {
    fn from(e: HeapError) -> Self {
        match e {
            HeapError::NoMemory => SystemException::new(ExceptionKind::NoMemory, 0, CompletionStatus::No),
            HeapError::TooLarge => SystemException::new(ExceptionKind::ImpLimit, 0, CompletionStatus::No),
            HeapError::OutOfRange => SystemException::new(ExceptionKind::BadParam, 0, CompletionStatus::No),
            HeapError::Collision => SystemException::new(ExceptionKind::BadInvOrder, 0, CompletionStatus::No),
            HeapError::Port(_) => SystemException::new(ExceptionKind::Internal, 0, CompletionStatus::Maybe),
            HeapError::FreeMem => SystemException::new(ExceptionKind::FreeMem, 0, CompletionStatus::No),
        }
    }
}
