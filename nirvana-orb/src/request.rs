//! `IORequest` state machine (spec.md §4.6).

use crate::stream::StreamOut;
use bitflags::bitflags;
use nirvana_sched::Event;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResponseFlags: u32 {
        const RESPONSE_EXPECTED = 0x1;
        const RESPONSE_DATA     = 0x2;
        const REQUEST_ASYNC     = 0x4;
    }
}

impl ResponseFlags {
    /// Neither expected nor data: a oneway call with no reply at all.
    pub fn is_oneway(self) -> bool {
        !self.intersects(Self::RESPONSE_EXPECTED | Self::RESPONSE_DATA)
    }

    /// Expected without data: an acknowledgement-only reply.
    pub fn is_ack_only(self) -> bool {
        self.contains(Self::RESPONSE_EXPECTED) && !self.contains(Self::RESPONSE_DATA)
    }

    /// Expected with data: a standard two-way call.
    pub fn is_two_way(self) -> bool {
        self.contains(Self::RESPONSE_EXPECTED) && self.contains(Self::RESPONSE_DATA)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Built = 0,
    Invoking = 1,
    AwaitingReply = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl RequestState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Built,
            1 => Self::Invoking,
            2 => Self::AwaitingReply,
            3 => Self::Completed,
            4 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

type Callback = Box<dyn FnOnce(&IORequest) + Send>;

/// `built → invoking → awaiting_reply → completed | failed | cancelled`.
/// The terminal-state callback fires exactly once; a reply that arrives
/// after cancellation is discarded (spec.md §4.6).
pub struct IORequest {
    operation: u32,
    flags: ResponseFlags,
    state: AtomicU8,
    done: Event,
    out: Mutex<StreamOut>,
    reply: Mutex<Option<Vec<u8>>>,
    is_exception: Mutex<bool>,
    callback: Mutex<Option<Callback>>,
}

impl std::fmt::Debug for IORequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IORequest")
            .field("operation", &self.operation)
            .field("flags", &self.flags)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl IORequest {
    pub fn new(operation: u32, flags: ResponseFlags, out: StreamOut) -> Arc<Self> {
        Arc::new(Self {
            operation,
            flags,
            state: AtomicU8::new(RequestState::Built as u8),
            done: Event::new(),
            out: Mutex::new(out),
            reply: Mutex::new(None),
            is_exception: Mutex::new(false),
            callback: Mutex::new(None),
        })
    }

    pub fn operation(&self) -> u32 {
        self.operation
    }

    pub fn flags(&self) -> ResponseFlags {
        self.flags
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn out_stream(&self) -> parking_lot::MutexGuard<'_, StreamOut> {
        self.out.lock()
    }

    pub fn set_callback(&self, cb: Callback) {
        *self.callback.lock() = Some(cb);
    }

    fn transition(&self, to: RequestState) {
        self.state.store(to as u8, Ordering::Release);
        if to.is_terminal() {
            if let Some(cb) = self.callback.lock().take() {
                cb(self);
            }
            self.done.signal();
        }
    }

    pub fn mark_invoking(&self) {
        self.transition(RequestState::Invoking);
    }

    pub fn mark_awaiting_reply(&self) {
        self.transition(RequestState::AwaitingReply);
    }

    /// Installs the unmarshaled reply body and completes the request.
    /// Discarded if the request was already cancelled.
    pub fn complete(&self, reply: Vec<u8>, is_exception: bool) {
        if self.state() == RequestState::Cancelled {
            return;
        }
        *self.reply.lock() = Some(reply);
        *self.is_exception.lock() = is_exception;
        self.transition(RequestState::Completed);
    }

    pub fn fail(&self) {
        if self.state() == RequestState::Cancelled {
            return;
        }
        self.transition(RequestState::Failed);
    }

    /// Caller-side cancellation: for a local dispatch this simply
    /// dequeues; for a remote one the `Domain` layer is responsible for
    /// sending a `CancelRequest` message before calling this.
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            self.transition(RequestState::Cancelled);
        }
    }

    pub fn is_exception(&self) -> bool {
        *self.is_exception.lock()
    }

    pub fn take_reply_bytes(&self) -> Option<Vec<u8>> {
        self.reply.lock().take()
    }

    /// Blocks the calling thread until a terminal state is reached, or
    /// `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(d) => self.done.wait_timeout(d),
            None => {
                self.done.wait();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oneway_ack_only_two_way_classification() {
        assert!(ResponseFlags::empty().is_oneway());
        assert!(ResponseFlags::RESPONSE_EXPECTED.is_ack_only());
        assert!((ResponseFlags::RESPONSE_EXPECTED | ResponseFlags::RESPONSE_DATA).is_two_way());
    }

    #[test]
    fn complete_runs_callback_exactly_once_and_wakes_waiter() {
        let req = IORequest::new(1, ResponseFlags::RESPONSE_EXPECTED | ResponseFlags::RESPONSE_DATA, StreamOut::new(true));
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired2 = fired.clone();
        req.set_callback(Box::new(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        req.mark_invoking();
        req.mark_awaiting_reply();
        req.complete(vec![1, 2, 3], false);
        assert!(req.wait(Some(Duration::from_millis(50))));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(req.state(), RequestState::Completed);
        assert_eq!(req.take_reply_bytes(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn reply_after_cancel_is_discarded() {
        let req = IORequest::new(1, ResponseFlags::RESPONSE_EXPECTED | ResponseFlags::RESPONSE_DATA, StreamOut::new(true));
        req.cancel();
        req.complete(vec![9], false);
        assert_eq!(req.state(), RequestState::Cancelled);
        assert_eq!(req.take_reply_bytes(), None);
    }
}
