//! mio reactor.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. One thread owns the poller, the
//! listener and every session socket. Decoded frames are handed to the worker
//! pool; replies come back through the session's outbound queue and a
//! [`Notice`] that wakes the poller.
//!
//! ## Edge triggering
//!
//! mio registrations are edge-triggered. Reads always continue until
//! `WouldBlock`, and after a write that did not finish the stream is
//! re-registered, which re-arms writable readiness.

use crate::error::SessionError;
use crate::protocols::FrameHandler;
use crate::runtime::notice::{Notice, Notifier};
use crate::runtime::outbound::DrainStatus;
use crate::runtime::registry::SessionRegistry;
use crate::runtime::session::SessionSettings;
use crate::runtime::worker::{process_session, PoolConfig, WorkerPool};
use crossbeam_channel::Receiver;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const LISTENER_TOKEN: Token = Token(usize::MAX);
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Reactor tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReactorSettings {
    pub session: SessionSettings,
    pub max_sessions: usize,
    pub max_events: usize,
    pub poll_timeout: Duration,
}

/// Readiness of one event, copied out so the event buffer can be reused
/// while sessions are mutated.
#[derive(Debug, Clone, Copy)]
struct Ready {
    token: Token,
    readable: bool,
    writable: bool,
}

/// Single-threaded event loop.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: SessionRegistry,
    settings: ReactorSettings,
    pool: WorkerPool,
    handler: Arc<dyn FrameHandler>,
    notifier: Notifier,
    notices: Receiver<Notice>,
    running: Arc<AtomicBool>,
}

impl Reactor {
    /// Take ownership of a bound, non-blocking listener and start the pool.
    pub fn new(
        listener: std::net::TcpListener,
        settings: ReactorSettings,
        pool: PoolConfig,
        handler: Arc<dyn FrameHandler>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let local_addr = listener.local_addr()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (notifier, notices) = Notifier::new(waker);

        Ok(Self {
            poll,
            events: Events::with_capacity(settings.max_events.max(1)),
            listener,
            local_addr,
            sessions: SessionRegistry::new(settings.max_sessions),
            settings,
            pool: WorkerPool::new(pool),
            handler,
            notifier,
            notices,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Notice sender for other threads.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Flag that keeps the loop alive; store `false` and wake to stop it.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the running flag is cleared.
    ///
    /// Every session is closed and the worker pool joined before this
    /// returns, also when polling fails.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr,
            format = ?self.settings.session.codec.format(),
            max_frame_size = self.settings.session.codec.max_frame_size(),
            max_sessions = self.settings.max_sessions,
            "Reactor started"
        );

        let result = self.event_loop();

        self.close_all();
        self.pool.shutdown();
        info!("Reactor stopped");

        result
    }

    fn event_loop(&mut self) -> io::Result<()> {
        let mut ready = Vec::with_capacity(self.settings.max_events);

        while self.running.load(Ordering::Acquire) {
            match self
                .poll
                .poll(&mut self.events, Some(self.settings.poll_timeout))
            {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Poll failed");
                    return Err(e);
                }
            }

            self.drain_notices();

            ready.clear();
            ready.extend(self.events.iter().map(|event| Ready {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable(),
            }));

            for event in &ready {
                match event.token {
                    LISTENER_TOKEN => self.accept(),
                    WAKER_TOKEN => {}
                    token => self.on_session_event(token, event.readable, event.writable),
                }
            }
        }

        Ok(())
    }

    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                Notice::WantsWrite { token, session } => {
                    let current = self
                        .sessions
                        .get_current(token, session)
                        .is_some_and(|s| s.shared().is_open());
                    if current {
                        self.flush(token);
                    }
                }
                Notice::Close { token, session } => {
                    let Some(current) = self.sessions.get_current(token, session) else {
                        continue;
                    };
                    // Replies queued before the close request go out if the
                    // socket takes them right away.
                    if let Err(e) = current.on_writable() {
                        trace!(session, error = %e, "Final flush failed");
                    }
                    self.close_session(token, &SessionError::Terminated);
                }
                Notice::ListSessions(reply) => {
                    let _ = reply.send(self.sessions.summaries());
                }
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let Some(session) =
                        self.sessions
                            .insert(stream, peer, self.settings.session)
                    else {
                        warn!(
                            peer = %peer,
                            limit = self.settings.max_sessions,
                            "Session limit reached, rejecting connection"
                        );
                        continue;
                    };

                    let token = session.shared().token();
                    let id = session.id();
                    if let Err(e) = session.register(self.poll.registry()) {
                        error!(session = id, error = %e, "Failed to register session");
                        self.sessions.remove(token);
                        continue;
                    }

                    debug!(session = id, peer = %peer, token = token.0, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn on_session_event(&mut self, token: Token, readable: bool, writable: bool) {
        if readable {
            let Some(session) = self.sessions.get_mut(token) else {
                return;
            };
            let pass = session.on_readable();
            // Frames completed before EOF or an error still get handled
            if pass.queued > 0 {
                self.schedule(token);
            }
            if let Some(e) = pass.error {
                self.close_session(token, &e);
                return;
            }
        }

        if writable {
            self.flush(token);
        }
    }

    /// Hand the session's inbound frames to the pool, unless a job for it is
    /// already running; that job picks the new frames up.
    fn schedule(&mut self, token: Token) {
        let Some(session) = self.sessions.get(token) else {
            return;
        };
        let shared = Arc::clone(session.shared());
        if !shared.try_schedule() {
            trace!(session = shared.id(), "Session already scheduled");
            return;
        }

        let handler = Arc::clone(&self.handler);
        let notifier = self.notifier.clone();
        self.pool.submit(Box::new(move || {
            process_session(&shared, handler.as_ref(), &notifier)
        }));
    }

    /// Write what the session has queued and set interest to match.
    fn flush(&mut self, token: Token) {
        let Some(session) = self.sessions.get_mut(token) else {
            return;
        };

        let result = session.on_writable().and_then(|status| {
            let interest = match status {
                DrainStatus::Complete => Interest::READABLE,
                DrainStatus::Progress | DrainStatus::Blocked => {
                    Interest::READABLE | Interest::WRITABLE
                }
            };
            // Unfinished writes always re-register to re-arm the edge.
            if status != DrainStatus::Complete || interest != session.interest() {
                session.set_interest(self.poll.registry(), interest)?;
            }
            Ok(status)
        });

        match result {
            Ok(status) => trace!(token = token.0, ?status, "Flushed"),
            Err(e) => self.close_session(token, &e),
        }
    }

    /// Remove, deregister and drop a session. Safe to call more than once.
    fn close_session(&mut self, token: Token, reason: &SessionError) {
        let Some(mut session) = self.sessions.remove(token) else {
            return;
        };
        if let Err(e) = session.deregister(self.poll.registry()) {
            trace!(session = session.id(), error = %e, "Deregister failed");
        }
        if !session.close() {
            return;
        }

        let id = session.id();
        let peer = session.shared().peer();
        match reason {
            SessionError::Protocol(e) => {
                warn!(session = id, peer = %peer, error = %e, "Protocol violation, session closed")
            }
            SessionError::Eof => debug!(session = id, peer = %peer, "Peer closed connection"),
            other => debug!(session = id, peer = %peer, reason = %other, "Session closed"),
        }
    }

    fn close_all(&mut self) {
        let tokens = self.sessions.tokens();
        if !tokens.is_empty() {
            info!(sessions = tokens.len(), "Closing sessions");
        }
        for token in tokens {
            self.close_session(token, &SessionError::Terminated);
        }
    }
}
