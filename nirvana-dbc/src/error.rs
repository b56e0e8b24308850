//! SQL warnings/exceptions and their mapping onto the CORBA system
//! exception taxonomy (spec.md §7), grounded on `original_source/dbc`'s
//! `SQLException`/`SQLWarning` usage.

use nirvana_core::exception::{CompletionStatus, ExceptionKind, SystemException};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SqlWarning {
    pub code: i32,
    pub message: String,
}

impl SqlWarning {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

#[derive(Debug, Error, Clone)]
#[error("{}: {}", .0.code, .0.message)]
pub struct SqlException(pub SqlWarning);

#[derive(Debug, Error, Clone)]
pub enum DbcError {
    #[error("connection create timeout")]
    CreateTimeout,
    #[error("pool configuration invalid: max_create must be nonzero and >= max_size")]
    BadPoolConfig,
    #[error("connection is closed")]
    Closed,
    #[error(transparent)]
    Sql(#[from] SqlException),
}

impl From<DbcError> for SystemException {
    fn from(e: DbcError) -> Self {
        match e {
            DbcError::CreateTimeout => SystemException::new(ExceptionKind::Transient, 0, CompletionStatus::No),
            DbcError::BadPoolConfig => SystemException::new(ExceptionKind::BadParam, 0, CompletionStatus::No),
            DbcError::Closed => SystemException::new(ExceptionKind::ObjectNotExist, 0, CompletionStatus::No),
            DbcError::Sql(SqlException(w)) => SystemException::new(ExceptionKind::Unknown, w.code as u32, CompletionStatus::Maybe),
        }
    }
}
