//! Outbound frame queue and resumable writer.
//!
//! Workers push reply frames onto an [`OutboundQueue`] without taking any
//! lock. The reactor owns the matching [`OutboundWriter`], which encodes
//! frames one at a time and remembers how much of the current frame the
//! socket has accepted, so a partial write resumes exactly where it stopped.

use crate::error::SessionError;
use crate::frame::{Frame, FrameCodec};
use bytes::{Buf, Bytes};
use crossbeam_queue::SegQueue;
use std::io::{self, Write};

/// Lock-free FIFO of frames awaiting transmission.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: SegQueue<Frame>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. Safe to call from any thread.
    pub fn enqueue(&self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn pop(&self) -> Option<Frame> {
        self.frames.pop()
    }
}

/// Result of one [`OutboundWriter::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Frames remain but the per-call budget is spent; keep write interest.
    Progress,
    /// Everything queued has been written; switch back to read interest.
    Complete,
    /// The socket stopped accepting bytes; wait for the next writable event.
    Blocked,
}

/// Reactor-side state of the frame being written.
#[derive(Debug)]
pub struct OutboundWriter {
    current: Option<Bytes>,
    max_frames_per_drain: usize,
}

impl OutboundWriter {
    /// `max_frames_per_drain` bounds how many frames one call may finish.
    pub fn new(max_frames_per_drain: usize) -> Self {
        Self {
            current: None,
            max_frames_per_drain: max_frames_per_drain.max(1),
        }
    }

    /// Whether a frame is partially written.
    pub fn has_partial(&self) -> bool {
        self.current.is_some()
    }

    /// Write queued frames until the queue empties, the socket blocks, or the
    /// frame budget runs out.
    ///
    /// Frames leave in queue order and a partially written frame always
    /// finishes before the next one starts. Any write error other than
    /// `WouldBlock` is returned and the session must be closed.
    pub fn drain<W: Write>(
        &mut self,
        queue: &OutboundQueue,
        codec: &FrameCodec,
        writer: &mut W,
    ) -> Result<DrainStatus, SessionError> {
        let mut finished = 0;

        loop {
            if self.current.is_none() {
                if finished == self.max_frames_per_drain && !queue.is_empty() {
                    return Ok(DrainStatus::Progress);
                }
                match queue.pop() {
                    Some(frame) => self.current = Some(codec.encode(&frame)?),
                    None => return Ok(DrainStatus::Complete),
                }
            }
            let Some(pending) = self.current.as_mut() else {
                return Ok(DrainStatus::Complete);
            };

            match writer.write(&pending[..]) {
                Ok(0) => return Ok(DrainStatus::Blocked),
                Ok(n) if n < pending.len() => {
                    pending.advance(n);
                    return Ok(DrainStatus::Blocked);
                }
                Ok(_) => {
                    self.current = None;
                    finished += 1;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(DrainStatus::Blocked);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use proptest::prelude::*;

    /// Writer that accepts at most `limit` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer that replays a script of results.
    struct Scripted {
        script: Vec<io::Result<usize>>,
        out: Vec<u8>,
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.script.remove(0) {
                Ok(n) => {
                    let n = n.min(buf.len());
                    self.out.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn codec() -> FrameCodec {
        FrameCodec::new(FrameFormat::Minimal, 1024)
    }

    #[test]
    fn test_empty_queue_is_complete() {
        let queue = OutboundQueue::new();
        let mut writer = OutboundWriter::new(16);
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 1024,
        };

        let status = writer.drain(&queue, &codec(), &mut sink).unwrap();
        assert_eq!(status, DrainStatus::Complete);
        assert!(sink.out.is_empty());
    }

    #[test]
    fn test_full_drain() {
        let queue = OutboundQueue::new();
        queue.enqueue(Frame::raw(&b"abc"[..]));
        queue.enqueue(Frame::raw(&b"xyz"[..]));
        let mut writer = OutboundWriter::new(16);
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 1024,
        };

        let status = writer.drain(&queue, &codec(), &mut sink).unwrap();

        assert_eq!(status, DrainStatus::Complete);
        assert_eq!(sink.out, b"\x00\x00\x00\x03abc\x00\x00\x00\x03xyz");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_write_blocks() {
        let queue = OutboundQueue::new();
        queue.enqueue(Frame::raw(&b"abc"[..]));
        let mut writer = OutboundWriter::new(16);
        let mut sink = Scripted {
            script: vec![Ok(0)],
            out: Vec::new(),
        };

        let status = writer.drain(&queue, &codec(), &mut sink).unwrap();
        assert_eq!(status, DrainStatus::Blocked);
        assert!(writer.has_partial());
    }

    #[test]
    fn test_partial_write_resumes_in_place() {
        let queue = OutboundQueue::new();
        queue.enqueue(Frame::raw(&b"abc"[..]));
        queue.enqueue(Frame::raw(&b"de"[..]));
        let mut writer = OutboundWriter::new(16);
        let mut sink = Scripted {
            script: vec![
                Ok(5),
                Err(io::ErrorKind::WouldBlock.into()),
                Err(io::ErrorKind::Interrupted.into()),
                Ok(100),
                Ok(100),
            ],
            out: Vec::new(),
        };

        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Blocked
        );
        // The second frame must not start while the first is incomplete
        assert_eq!(queue.len(), 1);
        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Blocked
        );
        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Complete
        );
        assert_eq!(sink.out, b"\x00\x00\x00\x03abc\x00\x00\x00\x02de");
    }

    #[test]
    fn test_reset_is_an_error() {
        let queue = OutboundQueue::new();
        queue.enqueue(Frame::raw(&b"abc"[..]));
        let mut writer = OutboundWriter::new(16);
        let mut sink = Scripted {
            script: vec![Err(io::ErrorKind::ConnectionReset.into())],
            out: Vec::new(),
        };

        let err = writer.drain(&queue, &codec(), &mut sink).unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[test]
    fn test_budget_reports_progress() {
        let queue = OutboundQueue::new();
        for _ in 0..5 {
            queue.enqueue(Frame::raw(&b"z"[..]));
        }
        let mut writer = OutboundWriter::new(2);
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 1024,
        };

        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Progress
        );
        assert_eq!(queue.len(), 3);
        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Progress
        );
        assert_eq!(
            writer.drain(&queue, &codec(), &mut sink).unwrap(),
            DrainStatus::Complete
        );
        assert_eq!(sink.out.len(), 5 * 5);
    }

    #[test]
    fn test_oversized_reply_is_rejected() {
        let queue = OutboundQueue::new();
        queue.enqueue(Frame::raw(vec![0u8; 2048]));
        let mut writer = OutboundWriter::new(16);
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 4096,
        };

        let err = writer.drain(&queue, &codec(), &mut sink).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(sink.out.is_empty());
    }

    proptest! {
        #[test]
        fn prop_trickled_writes_preserve_bytes(
            bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..50), 1..12),
            limit in 1usize..17,
        ) {
            let codec = codec();
            let queue = OutboundQueue::new();
            let mut expected = Vec::new();
            for body in &bodies {
                let frame = Frame::raw(body.clone());
                expected.extend_from_slice(&codec.encode(&frame).unwrap());
                queue.enqueue(frame);
            }

            let mut writer = OutboundWriter::new(4);
            let mut sink = Trickle { out: Vec::new(), limit };
            let mut rounds = 0;
            while writer.drain(&queue, &codec, &mut sink).unwrap() != DrainStatus::Complete {
                rounds += 1;
                prop_assert!(rounds < 100_000);
            }

            prop_assert_eq!(sink.out, expected);
        }
    }
}
