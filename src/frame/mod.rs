//! Wire frames.
//!
//! Every message on the stream is a big-endian length prefix followed by the
//! bytes it counts. Depending on the configured [`FrameFormat`] those bytes
//! start with a `type` and an `id` field:
//!
//! ```text
//! Minimal:   [length:4][body:length]
//! Typed:     [length:4][type:4][body:length-4]
//! Sequenced: [length:4][type:4][id:4][body:length-8]
//! ```
//!
//! `length` never counts itself, so a reader can tell whether a frame is
//! complete by comparing it with the bytes available after the prefix.

pub mod buffer;
pub mod codec;
pub mod decoder;
pub mod message;

pub use buffer::Accumulator;
pub use codec::FrameCodec;
pub use decoder::{Decoded, FrameDecoder};
pub use message::{Message, MessageRegistry};

use bytes::Bytes;
use serde::Deserialize;

/// Size of the length prefix in bytes.
pub const LENGTH_SIZE: usize = 4;

/// Size of the `type` header field in bytes.
pub const TYPE_SIZE: usize = 4;

/// Size of the `id` header field in bytes.
pub const ID_SIZE: usize = 4;

/// Header layout variant spoken on a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// Length prefix and body only.
    Minimal,
    /// Length prefix, type, body.
    #[default]
    Typed,
    /// Length prefix, type, id, body.
    Sequenced,
}

impl FrameFormat {
    /// Bytes of fixed header fields that follow the length prefix.
    pub const fn fields_after_length(self) -> usize {
        match self {
            FrameFormat::Minimal => 0,
            FrameFormat::Typed => TYPE_SIZE,
            FrameFormat::Sequenced => TYPE_SIZE + ID_SIZE,
        }
    }

    /// Full header size including the length prefix.
    pub const fn header_size(self) -> usize {
        LENGTH_SIZE + self.fields_after_length()
    }
}

/// One complete protocol message.
///
/// Frames are immutable once built. The body is a `Bytes`, so cloning a frame
/// to hand it between the reactor and a worker never copies payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: u32,
    id: Option<u32>,
    body: Bytes,
}

impl Frame {
    /// Build a frame of the given type.
    pub fn new(kind: u32, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id: None,
            body: body.into(),
        }
    }

    /// Build a frame carrying a correlation id.
    pub fn with_id(kind: u32, id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id: Some(id),
            body: body.into(),
        }
    }

    /// Build an untyped frame, as produced by the minimal format.
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Self::new(0, body)
    }

    /// Message type.
    pub fn kind(&self) -> u32 {
        self.kind
    }

    /// Correlation id, if the frame carries one.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Value of the length prefix when this frame is written in `format`.
    pub fn wire_length(&self, format: FrameFormat) -> usize {
        format.fields_after_length() + self.body.len()
    }

    /// Total encoded size in `format`, prefix included.
    pub fn encoded_len(&self, format: FrameFormat) -> usize {
        LENGTH_SIZE + self.wire_length(format)
    }
}
