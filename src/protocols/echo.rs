//! Echo handler.
//!
//! A simple echo service for throughput and I/O testing: every frame is sent
//! back framed exactly as it arrived. Useful for:
//!
//! 1. **Throughput testing**: raw frame handling with no business logic.
//! 2. **Partial read/write handling**: payloads of any size up to the
//!    configured maximum come back byte-identical.
//! 3. **Correctness validation**: compare echoed frames with what was sent.
//!
//! ## Special commands
//!
//! A frame whose body is `quit` (any case, surrounding whitespace ignored)
//! closes the session instead of being echoed.
//!
//! Text messages (type 100) are decoded through the message registry and
//! logged; anything the registry does not know is echoed untouched.

use super::{FrameHandler, Outcome};
use crate::error::FrameError;
use crate::frame::{Frame, Message, MessageRegistry};
use tracing::{debug, trace};

/// Echoes frames back to their sender.
#[derive(Debug, Default)]
pub struct EchoHandler {
    messages: MessageRegistry,
}

impl EchoHandler {
    pub fn new(messages: MessageRegistry) -> Self {
        Self { messages }
    }
}

/// Whether a frame body is the `quit` command.
pub fn is_quit(body: &[u8]) -> bool {
    body.trim_ascii().eq_ignore_ascii_case(b"QUIT")
}

impl FrameHandler for EchoHandler {
    fn handle(&self, session: u64, frame: Frame) -> Outcome {
        if is_quit(frame.body()) {
            debug!(session, "Quit requested");
            return Outcome::Terminate;
        }

        match self.messages.decode(&frame) {
            Ok(Message::Text(text)) => trace!(session, %text, "Text message"),
            Err(FrameError::UnknownMessage(kind)) => {
                trace!(session, kind, len = frame.body().len(), "Opaque frame")
            }
            Err(e) => debug!(session, error = %e, "Undecodable frame, echoing as-is"),
        }

        Outcome::Reply(frame)
    }
}
