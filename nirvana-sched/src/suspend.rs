//! Suspension-aware blocking wait (spec.md §5): parks the calling worker
//! thread on an [`Event`] while releasing the current `ExecDomain`'s
//! `SyncDomain` pin, so a sibling ED on the same sync context can run
//! while this thread is blocked, and reacquires the pin before
//! returning. Falls back to a plain wait when called outside any
//! `ExecDomain` context (a test, or a free-context thread with no
//! `SyncDomain` to release).

use crate::current;
use crate::event::Event;

pub fn wait(event: &Event) {
    let Some(ed) = current::current() else {
        event.wait();
        return;
    };
    let sd = ed.sync_domain.lock().clone();
    match sd {
        Some(sd) => sd.suspend_and_wait(&ed, event),
        None => event.wait(),
    }
}
