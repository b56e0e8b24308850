//! Ambient stack shared by every crate in the workspace: the CORBA-style
//! error taxonomy, configuration loading, and logging bootstrap. Kept
//! free of dependencies on `nirvana-heap`/`nirvana-sched`/`nirvana-orb`
//! so that those crates can depend on it without a cycle; the actual
//! ports → heap → scheduler → binder → ORB → NS bootstrap sequence
//! (spec.md §9) lives in `nirvana-cli`, the one crate that can see every
//! layer at once.

pub mod config;
pub mod exception;
pub mod logging;

pub mod prelude {
    pub use crate::config::NirvanaConfig;
    pub use crate::exception::{CompletionStatus, ExceptionKind, SystemException};
}
