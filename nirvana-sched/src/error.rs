use thiserror::Error;

/// Mirrors the CORBA `SystemException` minor categories spec.md §4.4's
/// "Restricted mode" names directly (`BAD_INV_ORDER`, `NO_PERMISSION`);
/// the full taxonomy lives in `nirvana_core::exception`, this crate only
/// needs the subset scheduling can raise on its own.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    #[error("operation is not permitted in restricted (module_terminate) mode")]
    BadInvOrder,
    #[error("stateless object creation is disabled in restricted mode")]
    NoPermission,
    #[error("cross-context transition failed, execution domain rolled back")]
    TransitionFailed,
    #[error("execution domain was cancelled")]
    Cancelled,
}
