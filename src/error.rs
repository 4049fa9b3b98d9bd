//! Error types shared across the server.
//!
//! Errors are scoped: `FrameError` and `SessionError` never leave the session
//! that produced them, they are turned into a single close by the reactor.
//! `ServerError` is the only kind that aborts startup.

use std::io;
use std::net::SocketAddr;

/// Wire-level decoding and encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The length field is zero, too small for the header, or above the maximum.
    #[error("invalid frame length {length} (allowed {min}..={max})")]
    InvalidLength { length: u32, min: u32, max: u32 },

    /// The accumulator filled up without yielding a complete frame.
    #[error("receive buffer of {capacity} bytes exhausted without a complete frame")]
    BufferOverflow { capacity: usize },

    /// No decoder is registered for the frame type.
    #[error("unknown message type {0}")]
    UnknownMessage(u32),

    /// The frame body does not match what its type requires.
    #[error("malformed message body: {0}")]
    Malformed(&'static str),
}

/// Reasons a session ends. All of them are fatal to the session only.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection")]
    Eof,

    #[error("session terminated by handler")]
    Terminated,
}

/// Errors surfaced by `Server` construction and the reactor itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
