//! TCP server front end.
//!
//! Binds the listening socket, builds the reactor around it and exposes a
//! [`ServerHandle`] for operators: stop the server, list live sessions.

use crate::config::Config;
use crate::error::ServerError;
use crate::protocols::FrameHandler;
use crate::runtime::{Notice, Notifier, Reactor, SessionSummary};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// How long `list_sessions` waits for the reactor to answer.
const LIST_TIMEOUT: Duration = Duration::from_secs(1);

/// Listen backlog.
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    reactor: Reactor,
    handle: ServerHandle,
}

impl Server {
    /// Bind the listener and prepare the reactor and worker pool.
    ///
    /// Nothing is accepted until [`Server::run`].
    pub fn bind(config: &Config, handler: Arc<dyn FrameHandler>) -> Result<Self, ServerError> {
        let addr = resolve(&config.listen_addr())?;
        let listener = create_listener(addr)?;

        let reactor = Reactor::new(
            listener,
            config.reactor_settings(),
            config.pool_config(),
            handler,
        )?;
        let handle = ServerHandle {
            running: reactor.running(),
            notifier: reactor.notifier(),
            local_addr: reactor.local_addr(),
        };

        info!(address = %handle.local_addr, "Server listening");

        Ok(Server { reactor, handle })
    }

    /// Bind, then run the reactor on a thread of its own.
    pub fn start(
        config: &Config,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<(ServerHandle, JoinHandle<Result<(), ServerError>>), ServerError> {
        let server = Self::bind(config, handler)?;
        let handle = server.handle();
        let join = thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || server.run())?;
        Ok((handle, join))
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    /// Run the reactor on the current thread until shutdown.
    pub fn run(self) -> Result<(), ServerError> {
        self.reactor.run()?;
        Ok(())
    }
}

/// Cloneable control handle for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    notifier: Notifier,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Ask the reactor to stop. It closes every session and joins the worker
    /// pool before `run` returns.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
        self.notifier.wake();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of live sessions, ordered by id. Empty once the server has
    /// stopped.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        if !self.is_running() {
            return Vec::new();
        }
        let (reply, response) = crossbeam_channel::bounded(1);
        if !self.notifier.notify(Notice::ListSessions(reply)) {
            return Vec::new();
        }
        response.recv_timeout(LIST_TIMEOUT).unwrap_or_else(|e| {
            debug!(error = %e, "No session list from reactor");
            Vec::new()
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn resolve(listen: &str) -> Result<SocketAddr, ServerError> {
    listen
        .to_socket_addrs()
        .map_err(|_| ServerError::InvalidAddress(listen.to_string()))?
        .next()
        .ok_or_else(|| ServerError::InvalidAddress(listen.to_string()))
}

fn create_listener(addr: SocketAddr) -> Result<std::net::TcpListener, ServerError> {
    let bind = || -> std::io::Result<std::net::TcpListener> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;

        Ok(socket.into())
    };

    bind().map_err(|source| ServerError::Bind { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::EchoHandler;

    fn test_config() -> Config {
        Config {
            bind_ip: "127.0.0.1".to_string(),
            bind_port: 0,
            worker_min: 1,
            worker_max: 2,
            poll_timeout_ms: 10,
            ..Config::default()
        }
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("127.0.0.1:8000").unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            resolve("not an address"),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = first.local_addr().unwrap();

        let config = Config {
            bind_port: taken.port(),
            ..test_config()
        };
        let result = Server::bind(&config, Arc::new(EchoHandler::default()));
        assert!(matches!(result, Err(ServerError::Bind { addr, .. }) if addr == taken));
    }

    #[test]
    fn test_start_and_shutdown() {
        let (handle, join) = Server::start(&test_config(), Arc::new(EchoHandler::default())).unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.list_sessions().is_empty());

        handle.shutdown();
        join.join().unwrap().unwrap();

        assert!(!handle.is_running());
        assert!(handle.list_sessions().is_empty());
    }
}
