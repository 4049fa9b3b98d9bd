//! Readiness-driven runtime.
//!
//! - `event_loop`: the single reactor thread (mio; epoll on Linux, kqueue on macOS)
//! - `session` / `registry`: per-connection state and its slab index
//! - `outbound`: reply queue and the partial-write aware writer
//! - `worker`: bounded pool that runs frame processing off the reactor
//! - `notice`: worker-to-reactor requests

pub mod event_loop;
pub mod notice;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod worker;

pub use event_loop::{Reactor, ReactorSettings};
pub use notice::{Notice, Notifier};
pub use outbound::{DrainStatus, OutboundQueue, OutboundWriter};
pub use registry::SessionRegistry;
pub use session::{Session, SessionSettings, SessionShared, SessionState, SessionSummary};
pub use worker::{process_session, PoolConfig, Submitted, WorkerPool};
