//! Host port traits.
//!
//! The runtime core never touches the operating system directly: every
//! OS-specific capability (page-level memory protection, asynchronous file
//! I/O, worker threads, wall-clock/steady-clock time, debug output) is
//! injected through the traits in this crate, mirroring spec.md §9's "Port
//! interface" design note. `host` provides a reference implementation
//! suitable for a single process on a conventional OS; it is what
//! `nirvana-cli`'s bootstrap sequence wires up by default, and what the
//! test suites across the workspace use.

pub mod debugger;
pub mod device;
pub mod host;
pub mod memory;
pub mod sysinfo;
pub mod timer;

pub use debugger::Debugger;
pub use device::{AsyncDevice, DeviceError, IoCompletion, IoOp};
pub use memory::{CopyFlags, Memory, MemoryError, QueryParam};
pub use sysinfo::SystemInfo;
pub use timer::{DeadlineTime, SteadyTime, Timer};
