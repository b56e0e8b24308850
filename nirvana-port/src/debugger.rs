//! `Port::Debugger` — out-of-band debug string output.

pub trait Debugger: Send + Sync {
    fn output_debug_string(&self, s: &str);
}

/// Routes debug strings through `tracing::debug!`, the way the rest of the
/// runtime's logging does (spec.md §9, SPEC_FULL.md §4.14).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDebugger;

impl Debugger for TracingDebugger {
    fn output_debug_string(&self, s: &str) {
        tracing::debug!(target: "nirvana::debugger", "{}", s);
    }
}
