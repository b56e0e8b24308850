//! Installs the process-wide `tracing` subscriber. `Port::Debugger`
//! implementations route through `tracing::debug!` (spec.md §9), so this
//! is the single place that decides where those lines, and everything
//! else logged across the workspace, end up.

use tracing_subscriber::EnvFilter;

/// Reads `NIRVANA_LOG`, falling back to `RUST_LOG`, falling back to
/// `info`.
pub fn init() {
    let filter = EnvFilter::try_from_env("NIRVANA_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
