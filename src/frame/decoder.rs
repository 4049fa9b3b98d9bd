//! Streaming frame decoder.
//!
//! TCP delivers bytes with arbitrary boundaries. The decoder keeps whatever
//! does not yet form a complete frame in its [`Accumulator`] and picks up
//! from there on the next call, so splitting a stream into different chunks
//! never changes the frames that come out.
//!
//! A tail is only kept while its length prefix is in bounds. An invalid
//! prefix cannot be resynchronised (there is no delimiter), so the buffer is
//! discarded and the error is returned for the caller to close the session.

use super::{Accumulator, Frame, FrameCodec, LENGTH_SIZE};
use crate::error::FrameError;

/// Frames completed by one decode pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Complete frames in arrival order.
    pub frames: Vec<Frame>,
    /// Whether bytes of an incomplete frame remain buffered.
    pub has_tail: bool,
}

/// Reassembles frames from a byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buffer: Accumulator,
}

impl FrameDecoder {
    /// Create a decoder whose buffer holds `capacity` bytes.
    ///
    /// The capacity is raised to the largest encoded frame if it is smaller.
    pub fn new(codec: FrameCodec, capacity: usize) -> Self {
        Self {
            codec,
            buffer: Accumulator::new(capacity.max(codec.max_encoded_size())),
        }
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Bytes of an incomplete frame currently held.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_tail(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Append `data` and return every frame it completes.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Decoded, FrameError> {
        let mut frames = Vec::new();

        loop {
            let taken = self.buffer.extend_from_slice(data);
            data = &data[taken..];
            let before = frames.len();
            self.decode_into(&mut frames)?;

            if data.is_empty() {
                break;
            }
            if taken == 0 && frames.len() == before {
                self.buffer.clear();
                return Err(FrameError::BufferOverflow {
                    capacity: self.buffer.capacity(),
                });
            }
        }

        Ok(Decoded {
            frames,
            has_tail: self.has_tail(),
        })
    }

    /// Region to read socket data into. Follow with [`commit`](Self::commit).
    ///
    /// Fails when the buffer is full of an incomplete frame.
    pub fn read_buf(&mut self) -> Result<&mut [u8], FrameError> {
        self.buffer.compact();
        if self.buffer.spare_len() == 0 {
            let capacity = self.buffer.capacity();
            self.buffer.clear();
            return Err(FrameError::BufferOverflow { capacity });
        }
        Ok(self.buffer.spare_mut())
    }

    /// Record `n` bytes written into [`read_buf`](Self::read_buf).
    pub fn commit(&mut self, n: usize) {
        self.buffer.commit(n);
    }

    /// Decode whatever is buffered.
    pub fn decode(&mut self) -> Result<Decoded, FrameError> {
        let mut frames = Vec::new();
        self.decode_into(&mut frames)?;
        Ok(Decoded {
            frames,
            has_tail: self.has_tail(),
        })
    }

    fn decode_into(&mut self, frames: &mut Vec<Frame>) -> Result<(), FrameError> {
        loop {
            let available = self.buffer.readable();
            let Some(length) = FrameCodec::peek_length(available) else {
                break;
            };

            let length = match self.codec.check_length(length) {
                Ok(length) => length,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            };

            let end = LENGTH_SIZE + length;
            if available.len() < end {
                break;
            }

            frames.push(self.codec.decode_payload(&available[LENGTH_SIZE..end]));
            self.buffer.consume(end);
        }

        self.buffer.compact();
        Ok(())
    }
}
