//! Frame processing.
//!
//! The runtime moves frames; what a frame means is up to a [`FrameHandler`].
//! Handlers run on worker threads, one session at a time, and see that
//! session's frames in arrival order.
//!
//! ## Handlers
//! - `echo`: sends every frame back unchanged, `quit` ends the session

pub mod echo;

pub use echo::EchoHandler;

use crate::frame::Frame;

/// What to do after handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Queue a frame back to the peer.
    Reply(Frame),
    /// Nothing to send.
    Ignore,
    /// Close the session. Frames still queued behind this one are dropped.
    Terminate,
}

/// Pluggable per-frame processing.
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one frame received on session `session`.
    fn handle(&self, session: u64, frame: Frame) -> Outcome;
}

impl<F> FrameHandler for F
where
    F: Fn(u64, Frame) -> Outcome + Send + Sync + 'static,
{
    fn handle(&self, session: u64, frame: Frame) -> Outcome {
        self(session, frame)
    }
}
