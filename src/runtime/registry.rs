//! Registry of live sessions.
//!
//! Slab-backed, keyed by the mio `Token` of each session, so event dispatch
//! is an O(1) index. Slab slots are reused after removal; session ids are
//! not, they come from a separate counter that only ever increases.
//!
//! Only the reactor thread mutates the registry.

use crate::runtime::session::{Session, SessionSettings, SessionShared, SessionSummary};
use mio::net::TcpStream;
use mio::Token;
use slab::Slab;
use std::net::SocketAddr;
use std::sync::Arc;

/// Live sessions indexed by token.
#[derive(Debug)]
pub struct SessionRegistry<S = TcpStream> {
    sessions: Slab<Session<S>>,
    next_id: u64,
    max_sessions: usize,
}

impl<S> SessionRegistry<S> {
    /// Create a registry holding at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Slab::with_capacity(max_sessions.min(1024)),
            next_id: 1,
            max_sessions,
        }
    }

    /// Create and insert a session for an accepted stream.
    ///
    /// Returns `None` if the registry is at capacity; the stream is dropped.
    pub fn insert(
        &mut self,
        stream: S,
        peer: SocketAddr,
        settings: SessionSettings,
    ) -> Option<&mut Session<S>> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let entry = self.sessions.vacant_entry();
        let shared = Arc::new(SessionShared::new(id, Token(entry.key()), peer));
        Some(entry.insert(Session::new(stream, shared, settings)))
    }

    pub fn get(&self, token: Token) -> Option<&Session<S>> {
        self.sessions.get(token.0)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Session<S>> {
        self.sessions.get_mut(token.0)
    }

    /// Look up a session only if the slot still holds session `id`.
    ///
    /// Notices from workers name both; a reused slot must not match.
    pub fn get_current(&mut self, token: Token, id: u64) -> Option<&mut Session<S>> {
        self.sessions.get_mut(token.0).filter(|s| s.id() == id)
    }

    /// Remove a session. Returns `None` if it was already removed.
    pub fn remove(&mut self, token: Token) -> Option<Session<S>> {
        self.sessions.try_remove(token.0)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.sessions.contains(token.0)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Tokens of every live session.
    pub fn tokens(&self) -> Vec<Token> {
        self.sessions.iter().map(|(key, _)| Token(key)).collect()
    }

    /// Snapshot of every live session, ordered by id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .iter()
            .map(|(_, session)| session.shared().summary())
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }
}
