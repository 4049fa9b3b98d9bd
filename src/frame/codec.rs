//! Header encoding and length validation.

use super::{Frame, FrameFormat, LENGTH_SIZE};
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Format plus size limit, shared by the decoder and the outbound writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    format: FrameFormat,
    max_frame_size: u32,
}

impl FrameCodec {
    /// `max_frame_size` bounds the length prefix, i.e. everything after it.
    pub fn new(format: FrameFormat, max_frame_size: usize) -> Self {
        Self {
            format,
            max_frame_size: u32::try_from(max_frame_size).unwrap_or(u32::MAX),
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size as usize
    }

    /// Largest encoded frame, length prefix included.
    pub fn max_encoded_size(&self) -> usize {
        LENGTH_SIZE + self.max_frame_size()
    }

    /// Smallest legal length prefix: non-zero and large enough for the header.
    pub fn min_length(&self) -> u32 {
        (self.format.fields_after_length() as u32).max(1)
    }

    /// Validate a length prefix.
    pub fn check_length(&self, length: u32) -> Result<usize, FrameError> {
        let min = self.min_length();
        if length < min || length > self.max_frame_size {
            return Err(FrameError::InvalidLength {
                length,
                min,
                max: self.max_frame_size,
            });
        }
        Ok(length as usize)
    }

    /// Read the length prefix without consuming it.
    pub fn peek_length(input: &[u8]) -> Option<u32> {
        let prefix: [u8; LENGTH_SIZE] = input.get(..LENGTH_SIZE)?.try_into().ok()?;
        Some(u32::from_be_bytes(prefix))
    }

    /// Encode a frame into a fresh buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(frame.encoded_len(self.format));
        self.encode_into(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Append the encoded frame to `dst`.
    pub fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let length = u32::try_from(frame.wire_length(self.format)).unwrap_or(u32::MAX);
        self.check_length(length)?;

        dst.reserve(LENGTH_SIZE + length as usize);
        dst.put_u32(length);
        match self.format {
            FrameFormat::Minimal => {}
            FrameFormat::Typed => dst.put_u32(frame.kind()),
            FrameFormat::Sequenced => {
                dst.put_u32(frame.kind());
                dst.put_u32(frame.id().unwrap_or(0));
            }
        }
        dst.put_slice(frame.body());
        Ok(())
    }

    /// Build a frame from the `length` bytes that follow a validated prefix.
    pub(crate) fn decode_payload(&self, payload: &[u8]) -> Frame {
        let field = |at: usize| {
            u32::from_be_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };
        let fields = self.format.fields_after_length();
        let body = Bytes::copy_from_slice(&payload[fields..]);

        match self.format {
            FrameFormat::Minimal => Frame::raw(body),
            FrameFormat::Typed => Frame::new(field(0), body),
            FrameFormat::Sequenced => Frame::with_id(field(0), field(4), body),
        }
    }
}
