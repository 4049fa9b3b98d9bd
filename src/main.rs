//! framed-reactor: a length-prefixed frame server
//!
//! Features:
//! - Single mio reactor for all client sockets
//! - Minimal, typed and sequenced frame headers
//! - Bounded worker pool with caller-runs backpressure
//! - Operator console on stdin
//! - Configuration via CLI arguments or TOML file

use framed_reactor::console::run_console;
use framed_reactor::{Config, EchoHandler, Server};
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen_addr(),
        format = ?config.frame_format,
        max_frame_size = config.max_frame_size,
        workers = config.worker_min,
        max_workers = config.worker_max,
        "Starting framed-reactor server"
    );

    let (handle, reactor) = Server::start(&config, Arc::new(EchoHandler::default()))?;

    let console_handle = handle.clone();
    let console_config = config.clone();
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            if let Err(e) = run_console(stdin.lock(), io::stdout(), &console_handle, &console_config) {
                error!(error = %e, "Console failed");
            }
        })?;

    match reactor.join() {
        Ok(result) => result?,
        Err(_) => return Err("reactor thread panicked".into()),
    }

    Ok(())
}
