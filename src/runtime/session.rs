//! Per-connection session state.
//!
//! A session is split along thread ownership:
//!
//! - [`SessionShared`] sits behind an `Arc` and is what worker threads get.
//!   It holds the identity, the lifecycle state and the two lock-free frame
//!   queues.
//! - [`Session`] is owned by the reactor through the registry. It holds the
//!   socket, the decoder and the outbound writer, none of which a worker may
//!   touch.
//!
//! Lifecycle: `Open -> Closing -> Closed`. The first transition out of `Open`
//! wins, whichever thread makes it; later close requests are no-ops.

use crate::error::SessionError;
use crate::frame::{Frame, FrameCodec, FrameDecoder};
use crate::runtime::outbound::{DrainStatus, OutboundQueue, OutboundWriter};
use chrono::{DateTime, Local};
use crossbeam_queue::SegQueue;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Per-session sizing shared by every session of a server.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub codec: FrameCodec,
    pub buffer_size: usize,
    pub max_frames_per_drain: usize,
}

/// Snapshot of a session for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: u64,
    pub connected_at: DateTime<Local>,
    pub peer: SocketAddr,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} peer={} connected={}",
            self.id,
            self.peer,
            self.connected_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Outcome of draining a readable socket.
#[derive(Debug, Default)]
pub struct ReadPass {
    /// Frames pushed onto the inbound queue.
    pub queued: usize,
    /// Why the session has to close, if it does.
    pub error: Option<SessionError>,
}

/// Session state reachable from worker threads.
#[derive(Debug)]
pub struct SessionShared {
    id: u64,
    token: Token,
    peer: SocketAddr,
    connected_at: DateTime<Local>,
    state: AtomicU8,
    terminated: AtomicBool,
    scheduled: AtomicBool,
    inbound: SegQueue<Frame>,
    outbound: OutboundQueue,
}

impl SessionShared {
    pub fn new(id: u64, token: Token, peer: SocketAddr) -> Self {
        Self {
            id,
            token,
            peer,
            connected_at: Local::now(),
            state: AtomicU8::new(SessionState::Open as u8),
            terminated: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            inbound: SegQueue::new(),
            outbound: OutboundQueue::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Local> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Move `Open -> Closing`. Returns `true` only for the caller that made
    /// the transition.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Close at the handler's request. Inbound frames still queued are
    /// dropped from here on. Returns `true` only for the caller that moved
    /// the session out of `Open`.
    pub fn terminate(&self) -> bool {
        self.terminated.store(true, Ordering::Release);
        self.begin_close()
    }

    /// Whether a handler ended the session.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Move to `Closed` from any state. Returns `true` the first time.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }

    pub fn push_inbound(&self, frame: Frame) {
        self.inbound.push(frame);
    }

    pub fn pop_inbound(&self) -> Option<Frame> {
        self.inbound.pop()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Claim the right to run a processing job. At most one job per session
    /// holds it at a time, which keeps per-session frame order.
    pub fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the processing claim.
    pub fn finish_processing(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            connected_at: self.connected_at,
            peer: self.peer,
        }
    }
}

/// Reactor-owned half of a session.
///
/// The session is the sole owner of its stream. Dropping it releases the
/// socket.
#[derive(Debug)]
pub struct Session<S = TcpStream> {
    stream: S,
    shared: Arc<SessionShared>,
    decoder: FrameDecoder,
    writer: OutboundWriter,
    interest: Interest,
}

impl<S> Session<S> {
    pub fn new(stream: S, shared: Arc<SessionShared>, settings: SessionSettings) -> Self {
        Self {
            stream,
            shared,
            decoder: FrameDecoder::new(settings.codec, settings.buffer_size),
            writer: OutboundWriter::new(settings.max_frames_per_drain),
            interest: Interest::READABLE,
        }
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    /// Interest currently registered with the poller.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Whether there is anything left to write.
    pub fn wants_write(&self) -> bool {
        self.writer.has_partial() || !self.shared.outbound().is_empty()
    }

    /// Finish the lifecycle. Returns `true` the first time only.
    pub fn close(&self) -> bool {
        self.shared.begin_close();
        self.shared.mark_closed()
    }
}

impl<S: Read> Session<S> {
    /// Read until the socket would block, decoding frames onto the inbound
    /// queue.
    ///
    /// EOF, read errors and protocol violations end the pass and are reported
    /// in [`ReadPass::error`]; the caller closes the session. Frames completed
    /// earlier in the same pass stay queued and are still reported, so they
    /// get processed. A partial frame pending at EOF is dropped.
    pub fn on_readable(&mut self) -> ReadPass {
        let mut pass = ReadPass::default();

        while self.shared.is_open() {
            match self.read_once() {
                Ok(Some(queued)) => pass.queued += queued,
                Ok(None) => break,
                Err(e) => {
                    pass.error = Some(e);
                    break;
                }
            }
        }

        pass
    }

    /// One read syscall. `None` means the socket would block.
    fn read_once(&mut self) -> Result<Option<usize>, SessionError> {
        loop {
            let buf = self.decoder.read_buf()?;
            match self.stream.read(buf) {
                Ok(0) => {
                    if self.decoder.has_tail() {
                        debug!(
                            session = self.shared.id(),
                            pending = self.decoder.pending(),
                            "Discarding partial frame at EOF"
                        );
                    }
                    return Err(SessionError::Eof);
                }
                Ok(n) => {
                    self.decoder.commit(n);
                    let decoded = self.decoder.decode()?;
                    trace!(
                        session = self.shared.id(),
                        bytes = n,
                        frames = decoded.frames.len(),
                        tail = decoded.has_tail,
                        "Read"
                    );
                    let queued = decoded.frames.len();
                    for frame in decoded.frames {
                        self.shared.push_inbound(frame);
                    }
                    return Ok(Some(queued));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S: Write> Session<S> {
    /// Drain the outbound queue to the socket.
    pub fn on_writable(&mut self) -> Result<DrainStatus, SessionError> {
        let codec = *self.decoder.codec();
        self.writer
            .drain(self.shared.outbound(), &codec, &mut self.stream)
    }
}

impl Session<TcpStream> {
    /// Register the stream for reads.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        self.interest = Interest::READABLE;
        registry.register(&mut self.stream, self.shared.token(), self.interest)
    }

    /// Re-register with `interest`.
    ///
    /// Always issues the syscall, even when the interest is unchanged, which
    /// re-arms the edge-triggered readiness after a blocked write.
    pub fn set_interest(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        self.interest = interest;
        registry.reregister(&mut self.stream, self.shared.token(), interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}
