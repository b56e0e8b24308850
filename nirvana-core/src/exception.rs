//! CORBA-style completion-status error taxonomy (spec.md §7). Every
//! runtime crate converts its own `thiserror` enum into a
//! [`SystemException`] at the boundary where it becomes caller-visible.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Yes,
    No,
    Maybe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionKind {
    #[error("NO_MEMORY")]
    NoMemory,
    #[error("IMP_LIMIT")]
    ImpLimit,
    #[error("FREE_MEM")]
    FreeMem,
    #[error("BAD_PARAM")]
    BadParam,
    #[error("BAD_TYPECODE")]
    BadTypecode,
    #[error("INV_OBJREF")]
    InvObjref,
    #[error("BAD_INV_ORDER")]
    BadInvOrder,
    #[error("BAD_OPERATION")]
    BadOperation,
    #[error("COMM_FAILURE")]
    CommFailure,
    #[error("TRANSIENT")]
    Transient,
    #[error("MARSHAL")]
    Marshal,
    #[error("NO_RESPONSE")]
    NoResponse,
    #[error("OBJECT_NOT_EXIST")]
    ObjectNotExist,
    #[error("PERSIST_STORE")]
    PersistStore,
    #[error("OBJ_ADAPTER")]
    ObjAdapter,
    #[error("NO_PERMISSION")]
    NoPermission,
    #[error("ARITHMETIC_ERROR")]
    ArithmeticError,
    #[error("DATA_CONVERSION")]
    DataConversion,
    #[error("UNKNOWN")]
    Unknown,
    #[error("INTERNAL")]
    Internal,
}

/// Floating-point-exception minor sub-reasons for `ArithmeticError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpeMinor {
    IntDiv,
    IntOvf,
    FltDiv,
    FltOvf,
    FltUnd,
    FltRes,
    FltInv,
    FltSub,
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: minor={minor} completed={completed:?}")]
pub struct SystemException {
    pub kind: ExceptionKind,
    pub minor: u32,
    pub completed: CompletionStatus,
}

impl SystemException {
    pub fn new(kind: ExceptionKind, minor: u32, completed: CompletionStatus) -> Self {
        Self { kind, minor, completed }
    }

    pub fn from_errno(kind: ExceptionKind, errno: i32, completed: CompletionStatus) -> Self {
        Self::new(kind, make_minor_errno(errno), completed)
    }

    pub fn fpe(minor: FpeMinor, completed: CompletionStatus) -> Self {
        Self::new(ExceptionKind::ArithmeticError, minor as u32, completed)
    }
}

/// Encodes a POSIX `errno` into a minor code that round-trips via
/// [`errno_from_minor`] (spec.md §7: "minor codes... preserve POSIX error
/// number round-trip").
pub fn make_minor_errno(errno: i32) -> u32 {
    const ERRNO_TAG: u32 = 0x8000_0000;
    ERRNO_TAG | (errno as u32 & 0x7fff_ffff)
}

pub fn errno_from_minor(minor: u32) -> Option<i32> {
    const ERRNO_TAG: u32 = 0x8000_0000;
    if minor & ERRNO_TAG != 0 {
        Some((minor & 0x7fff_ffff) as i32)
    } else {
        None
    }
}

/// One link in a bind-failure cause chain (spec.md §7: "bind errors with
/// a cause stack"). Printed outermost-first.
#[derive(Debug, Clone)]
pub enum BindCause {
    ObjectName(String),
    InterfaceNotFound(String),
    ModuleLoad(String),
    System(String),
    UnsupportedPlatform(String),
}

impl fmt::Display for BindCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindCause::ObjectName(s) => write!(f, "object name: {s}"),
            BindCause::InterfaceNotFound(s) => write!(f, "interface not found: {s}"),
            BindCause::ModuleLoad(s) => write!(f, "module load failed: {s}"),
            BindCause::System(s) => write!(f, "system error: {s}"),
            BindCause::UnsupportedPlatform(s) => write!(f, "unsupported platform: {s}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindError {
    pub causes: Vec<BindCause>,
}

impl BindError {
    pub fn push(mut self, cause: BindCause) -> Self {
        self.causes.push(cause);
        self
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BindError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trips_through_minor() {
        let minor = make_minor_errno(13);
        assert_eq!(errno_from_minor(minor), Some(13));
    }

    #[test]
    fn non_errno_minor_does_not_decode() {
        assert_eq!(errno_from_minor(42), None);
    }

    #[test]
    fn bind_error_prints_outermost_cause_first() {
        let err = BindError::default()
            .push(BindCause::ObjectName("Foo".into()))
            .push(BindCause::ModuleLoad("libfoo.so".into()));
        let rendered = err.to_string();
        let name_pos = rendered.find("Foo").unwrap();
        let module_pos = rendered.find("libfoo.so").unwrap();
        assert!(name_pos < module_pos);
    }
}
