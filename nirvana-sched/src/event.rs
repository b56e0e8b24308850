//! A one-shot wakeup used by suspended `ExecDomain`s and by `IORequest`'s
//! `wait(timeout)` (spec.md §4.6). Stackful-coroutine suspension is out of
//! scope here — a "suspended" execution domain is, concretely, a worker
//! thread parked on an `Event` inside the domain's runnable closure.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct Event {
    signalled: Mutex<bool>,
    cvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        *self.signalled.lock() = true;
        self.cvar.notify_all();
    }

    pub fn wait(&self) {
        let mut guard = self.signalled.lock();
        while !*guard {
            self.cvar.wait(&mut guard);
        }
    }

    /// Returns `true` if signalled before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.signalled.lock();
        if *guard {
            return true;
        }
        let result = self.cvar.wait_for(&mut guard, timeout);
        *guard || !result.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_unblocks_after_signal() {
        let event = Arc::new(Event::new());
        let e2 = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            e2.signal();
        });
        event.wait();
    }

    #[test]
    fn wait_timeout_expires_without_signal() {
        let event = Event::new();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
    }
}
