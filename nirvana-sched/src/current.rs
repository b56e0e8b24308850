//! Per-worker-thread "which `ExecDomain` am I running" binding, backing
//! `MemContext::current()` and request-handling code that needs to know
//! its caller's ED (e.g. to inherit a deadline, spec.md §4.4).

use crate::exec_domain::ExecDomain;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ExecDomain>>> = const { RefCell::new(None) };
}

pub(crate) fn set_current(ed: Option<Arc<ExecDomain>>) {
    CURRENT.with(|c| *c.borrow_mut() = ed);
}

pub fn current() -> Option<Arc<ExecDomain>> {
    CURRENT.with(|c| c.borrow().clone())
}
