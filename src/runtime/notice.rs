//! Cross-thread requests to the reactor.
//!
//! Only the reactor thread may change poll interest or touch the registry.
//! Workers and the operator handle post a [`Notice`] instead and wake the
//! poller; the reactor drains notices at the top of every loop iteration.

use crate::runtime::session::SessionSummary;
use crossbeam_channel::{Receiver, Sender};
use mio::{Token, Waker};
use std::sync::Arc;
use tracing::trace;

/// Request posted to the reactor thread.
#[derive(Debug)]
pub enum Notice {
    /// The session has queued outbound frames.
    WantsWrite { token: Token, session: u64 },
    /// The session asked to be closed.
    Close { token: Token, session: u64 },
    /// Reply with a snapshot of live sessions.
    ListSessions(Sender<Vec<SessionSummary>>),
}

/// Sending side of the notice channel plus the poller waker.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Notice>,
    waker: Arc<Waker>,
}

impl Notifier {
    pub fn new(waker: Arc<Waker>) -> (Self, Receiver<Notice>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender, waker }, receiver)
    }

    /// Post a notice and wake the reactor.
    ///
    /// Returns `false` once the reactor is gone.
    pub fn notify(&self, notice: Notice) -> bool {
        if self.sender.send(notice).is_err() {
            trace!("Reactor gone, notice dropped");
            return false;
        }
        self.wake();
        true
    }

    /// Wake the poller without posting anything.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            trace!(error = %e, "Failed to wake reactor");
        }
    }
}
