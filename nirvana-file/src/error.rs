//! Error taxonomy for `nirvana-file`, mapped to [`SystemException`] at the
//! boundary (spec.md §7).

use nirvana_core::exception::{make_minor_errno, CompletionStatus, ExceptionKind, SystemException};
use nirvana_port::DeviceError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FileError {
    #[error("lock range prevents this access")]
    LockDenied,
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("truncate already in flight")]
    TruncateInFlight,
}

impl From<FileError> for SystemException {
    fn from(e: FileError) -> Self {
        match e {
            FileError::LockDenied => SystemException::new(ExceptionKind::Transient, make_minor_errno(libc_eagain()), CompletionStatus::No),
            FileError::Device(DeviceError::Errno(errno)) => SystemException::from_errno(ExceptionKind::Internal, errno, CompletionStatus::Maybe),
            FileError::Device(DeviceError::Cancelled) => SystemException::new(ExceptionKind::Transient, 0, CompletionStatus::No),
            FileError::Device(DeviceError::Alignment) => SystemException::new(ExceptionKind::BadParam, 0, CompletionStatus::No),
            FileError::TruncateInFlight => SystemException::new(ExceptionKind::BadInvOrder, 0, CompletionStatus::No),
        }
    }
}

fn libc_eagain() -> i32 {
    11
}
