//! Configuration module for the framed-reactor server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::frame::{FrameCodec, FrameFormat, LENGTH_SIZE};
use crate::runtime::{PoolConfig, ReactorSettings, SessionSettings};
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "framed-reactor")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed frame server with a bounded worker pool", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads kept alive
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Upper bound on worker threads
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Largest accepted value of the length prefix
    #[arg(short = 'm', long)]
    pub max_frame_size: Option<usize>,

    /// Frame header layout
    #[arg(short = 'f', long, value_enum)]
    pub format: Option<FrameFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub reactor: ReactorConfig,
    pub logging: LoggingConfig,
}

/// `[server]`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ip: String,
    pub port: u16,
    pub client: ClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "localhost".to_string(),
            port: 8000,
            client: ClientConfig::default(),
        }
    }
}

/// `[server.client]`
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub thread: ThreadConfig,
}

/// `[server.client.thread]`: worker pool sizing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Threads kept alive
    pub count: usize,
    /// Upper bound on threads
    pub maxcount: usize,
    /// Idle time in milliseconds before an extra thread exits
    pub keepalive: u64,
    /// Run queue capacity
    pub queue: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            count: 5,
            maxcount: 10,
            keepalive: 1000,
            queue: 1024,
        }
    }
}

/// `[network]`
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct NetworkConfig {
    pub packet: PacketConfig,
    pub buffer: BufferConfig,
}

/// `[network.packet]`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PacketConfig {
    /// Largest accepted value of the length prefix
    pub maxsize: usize,
    pub format: FrameFormat,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            maxsize: 1024,
            format: FrameFormat::default(),
        }
    }
}

/// `[network.buffer]`
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BufferConfig {
    /// Per-session read buffer in bytes; two maximum frames when unset
    pub size: Option<usize>,
}

/// `[reactor]`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub poll_timeout_ms: u64,
    pub max_events: usize,
    pub max_frames_per_drain: usize,
    pub max_sessions: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            max_events: 1024,
            max_frames_per_drain: 64,
            max_sessions: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_ip: String,
    pub bind_port: u16,
    pub worker_min: usize,
    pub worker_max: usize,
    pub worker_idle_ms: u64,
    pub worker_queue: usize,
    pub max_frame_size: usize,
    pub frame_format: FrameFormat,
    pub buffer_size: usize,
    pub max_sessions: usize,
    pub poll_timeout_ms: u64,
    pub max_events: usize,
    pub max_frames_per_drain: usize,
    pub log_level: String,
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut config = Self::from_toml(toml_config);
        config.config_path = cli.config.clone();
        config.apply_cli(cli)?;
        config.validate()?;
        Ok(config)
    }

    /// Flatten the file layout. Nothing is validated here.
    pub fn from_toml(toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            network,
            reactor,
            logging,
        } = toml_config;
        let thread = server.client.thread;

        Config {
            bind_ip: server.ip,
            bind_port: server.port,
            worker_min: thread.count,
            worker_max: thread.maxcount,
            worker_idle_ms: thread.keepalive,
            worker_queue: thread.queue,
            max_frame_size: network.packet.maxsize,
            frame_format: network.packet.format,
            buffer_size: network
                .buffer
                .size
                .unwrap_or_else(|| default_buffer_size(network.packet.maxsize)),
            max_sessions: reactor.max_sessions,
            poll_timeout_ms: reactor.poll_timeout_ms,
            max_events: reactor.max_events,
            max_frames_per_drain: reactor.max_frames_per_drain,
            log_level: logging.level,
            config_path: None,
        }
    }

    fn apply_cli(&mut self, cli: CliArgs) -> Result<(), ConfigError> {
        if let Some(listen) = cli.listen {
            let (ip, port) = listen
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::Invalid(format!("listen address '{listen}' has no port")))?;
            self.bind_port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("bad port in listen address '{listen}'")))?;
            self.bind_ip = ip.trim_start_matches('[').trim_end_matches(']').to_string();
        }
        if let Some(workers) = cli.workers {
            self.worker_min = workers;
            self.worker_max = self.worker_max.max(workers);
        }
        if let Some(max_workers) = cli.max_workers {
            self.worker_max = max_workers;
        }
        if let Some(max_frame_size) = cli.max_frame_size {
            // A buffer sized for the old maximum would be too small
            self.buffer_size = self.buffer_size.max(default_buffer_size(max_frame_size));
            self.max_frame_size = max_frame_size;
        }
        if let Some(format) = cli.format {
            self.frame_format = format;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// Check the cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.worker_max == 0 {
            return invalid("server.client.thread.maxcount must be at least 1".into());
        }
        if self.worker_min > self.worker_max {
            return invalid(format!(
                "server.client.thread.count ({}) exceeds maxcount ({})",
                self.worker_min, self.worker_max
            ));
        }
        if self.worker_queue == 0 {
            return invalid("server.client.thread.queue must be at least 1".into());
        }
        let min_length = self.frame_format.fields_after_length().max(1);
        if self.max_frame_size < min_length || self.max_frame_size > u32::MAX as usize {
            return invalid(format!(
                "network.packet.maxsize ({}) must be between {} and {} for the {:?} format",
                self.max_frame_size,
                min_length,
                u32::MAX,
                self.frame_format
            ));
        }
        if self.buffer_size < LENGTH_SIZE + self.max_frame_size {
            return invalid(format!(
                "network.buffer.size ({}) cannot hold a maximum frame ({} bytes)",
                self.buffer_size,
                LENGTH_SIZE + self.max_frame_size
            ));
        }
        if self.max_sessions == 0 || self.max_events == 0 || self.max_frames_per_drain == 0 {
            return invalid("reactor limits must be at least 1".into());
        }
        Ok(())
    }

    /// `ip:port` as configured, before name resolution.
    pub fn listen_addr(&self) -> String {
        if self.bind_ip.contains(':') {
            format!("[{}]:{}", self.bind_ip, self.bind_port)
        } else {
            format!("{}:{}", self.bind_ip, self.bind_port)
        }
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.frame_format, self.max_frame_size)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min: self.worker_min,
            max: self.worker_max,
            idle_timeout: Duration::from_millis(self.worker_idle_ms),
            queue_capacity: self.worker_queue,
        }
    }

    pub fn reactor_settings(&self) -> ReactorSettings {
        ReactorSettings {
            session: SessionSettings {
                codec: self.codec(),
                buffer_size: self.buffer_size,
                max_frames_per_drain: self.max_frames_per_drain,
            },
            max_sessions: self.max_sessions,
            max_events: self.max_events,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }
}

fn default_buffer_size(max_frame_size: usize) -> usize {
    2 * (LENGTH_SIZE + max_frame_size)
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "listen            {}", self.listen_addr())?;
        writeln!(
            f,
            "workers           {}..{} (idle {} ms, queue {})",
            self.worker_min, self.worker_max, self.worker_idle_ms, self.worker_queue
        )?;
        writeln!(
            f,
            "frames            {:?}, max {} bytes",
            self.frame_format, self.max_frame_size
        )?;
        writeln!(f, "buffer            {} bytes", self.buffer_size)?;
        writeln!(
            f,
            "reactor           {} sessions, {} events, poll {} ms, {} frames/drain",
            self.max_sessions, self.max_events, self.poll_timeout_ms, self.max_frames_per_drain
        )?;
        write!(f, "log level         {}", self.log_level)?;
        if let Some(path) = &self.config_path {
            write!(f, "\nconfig file       {}", path.display())?;
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
