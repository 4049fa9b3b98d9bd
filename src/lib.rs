//! framed-reactor: length-prefixed frames over TCP on a single reactor thread.
//!
//! - One mio reactor owns the listener and every client socket
//! - A streaming decoder reassembles frames from arbitrarily split reads
//! - A bounded worker pool runs frame handlers, falling back to the caller
//!   when saturated
//! - Replies are written back by the reactor, resuming partial writes

pub mod config;
pub mod console;
pub mod error;
pub mod frame;
pub mod protocols;
pub mod runtime;
pub mod server;

pub use config::{Config, ConfigError};
pub use error::{FrameError, ServerError, SessionError};
pub use frame::{Frame, FrameCodec, FrameDecoder, FrameFormat};
pub use protocols::{EchoHandler, FrameHandler, Outcome};
pub use runtime::SessionSummary;
pub use server::{Server, ServerHandle};
