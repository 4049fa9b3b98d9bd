//! Typed messages carried in frames.
//!
//! A [`Message`] is a sum type keyed by the frame `type` field. Decoding and
//! encoding go through a [`MessageRegistry`] of plain function pointers per
//! type, so adding a message kind means adding a variant and one registry
//! entry.

use super::Frame;
use crate::error::FrameError;
use bytes::Bytes;
use std::collections::HashMap;

/// Type id of a UTF-8 text message.
pub const TEXT_MESSAGE: u32 = 100;

/// Decoded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A line of UTF-8 text.
    Text(String),
}

impl Message {
    /// Frame type this message is carried in.
    pub fn kind(&self) -> u32 {
        match self {
            Message::Text(_) => TEXT_MESSAGE,
        }
    }
}

type DecodeFn = fn(&Frame) -> Result<Message, FrameError>;
type EncodeFn = fn(&Message) -> Result<Bytes, FrameError>;

#[derive(Clone, Copy)]
struct MessageCodec {
    decode: DecodeFn,
    encode: EncodeFn,
}

/// Lookup table from frame type to message codec.
#[derive(Clone)]
pub struct MessageRegistry {
    codecs: HashMap<u32, MessageCodec>,
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.codecs.keys().collect();
        kinds.sort();
        f.debug_struct("MessageRegistry").field("kinds", &kinds).finish()
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(TEXT_MESSAGE, decode_text, encode_text);
        registry
    }
}

impl MessageRegistry {
    /// Registry with no message types.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register the codec for a frame type, replacing any previous one.
    pub fn register(&mut self, kind: u32, decode: DecodeFn, encode: EncodeFn) {
        self.codecs.insert(kind, MessageCodec { decode, encode });
    }

    pub fn contains(&self, kind: u32) -> bool {
        self.codecs.contains_key(&kind)
    }

    /// Decode a frame by its type.
    pub fn decode(&self, frame: &Frame) -> Result<Message, FrameError> {
        let codec = self
            .codecs
            .get(&frame.kind())
            .ok_or(FrameError::UnknownMessage(frame.kind()))?;
        (codec.decode)(frame)
    }

    /// Encode a message into a frame, carrying `id` if given.
    pub fn encode(&self, message: &Message, id: Option<u32>) -> Result<Frame, FrameError> {
        let kind = message.kind();
        let codec = self
            .codecs
            .get(&kind)
            .ok_or(FrameError::UnknownMessage(kind))?;
        let body = (codec.encode)(message)?;
        Ok(match id {
            Some(id) => Frame::with_id(kind, id, body),
            None => Frame::new(kind, body),
        })
    }
}

fn decode_text(frame: &Frame) -> Result<Message, FrameError> {
    std::str::from_utf8(frame.body())
        .map(|text| Message::Text(text.to_owned()))
        .map_err(|_| FrameError::Malformed("text message is not valid UTF-8"))
}

fn encode_text(message: &Message) -> Result<Bytes, FrameError> {
    match message {
        Message::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
    }
}
