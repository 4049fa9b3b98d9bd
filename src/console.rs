//! Operator console.
//!
//! Line-oriented commands read from any `BufRead`, normally stdin:
//!
//! ```text
//! help            list commands
//! show sessions   live sessions with peer and connect time
//! show config     resolved configuration
//! quit            stop the server
//! ```

use crate::config::Config;
use crate::server::ServerHandle;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Quit,
    ShowSessions,
    ShowConfig,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one input line. Case and extra whitespace are ignored.
    pub fn parse(line: &str) -> Self {
        let words: Vec<String> = line
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            [] => ConsoleCommand::Empty,
            ["help"] | ["?"] => ConsoleCommand::Help,
            ["quit"] | ["exit"] => ConsoleCommand::Quit,
            ["show", "sessions"] => ConsoleCommand::ShowSessions,
            ["show", "config"] => ConsoleCommand::ShowConfig,
            _ => ConsoleCommand::Unknown(line.trim().to_string()),
        }
    }
}

const HELP: &str = "\
help            list commands
show sessions   live sessions with peer and connect time
show config     resolved configuration
quit            stop the server";

/// Serve console commands until `quit`, end of input, or the server stops.
pub fn run_console<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    server: &ServerHandle,
    config: &Config,
) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if !server.is_running() {
            break;
        }

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => writeln!(output, "{HELP}")?,
            ConsoleCommand::Quit => {
                writeln!(output, "shutting down")?;
                server.shutdown();
                break;
            }
            ConsoleCommand::ShowSessions => {
                let sessions = server.list_sessions();
                writeln!(output, "{} session(s)", sessions.len())?;
                for session in sessions {
                    writeln!(output, "  {session}")?;
                }
            }
            ConsoleCommand::ShowConfig => writeln!(output, "{config}")?,
            ConsoleCommand::Unknown(command) => {
                debug!(%command, "Unknown console command");
                writeln!(output, "unknown command '{command}', try 'help'")?;
            }
        }
        output.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::EchoHandler;
    use crate::server::Server;
    use std::sync::Arc;

    #[test]
    fn test_parse() {
        assert_eq!(ConsoleCommand::parse("help"), ConsoleCommand::Help);
        assert_eq!(ConsoleCommand::parse("  QUIT \n"), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleCommand::parse("show   sessions"),
            ConsoleCommand::ShowSessions
        );
        assert_eq!(ConsoleCommand::parse("Show Config"), ConsoleCommand::ShowConfig);
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Empty);
        assert_eq!(
            ConsoleCommand::parse("show users"),
            ConsoleCommand::Unknown("show users".to_string())
        );
    }

    #[test]
    fn test_console_session() {
        let config = Config {
            bind_ip: "127.0.0.1".to_string(),
            bind_port: 0,
            worker_min: 1,
            worker_max: 1,
            poll_timeout_ms: 10,
            ..Config::default()
        };
        let (handle, join) = Server::start(&config, Arc::new(EchoHandler::default())).unwrap();

        let input = &b"help\nshow sessions\nshow config\nbogus\nquit\nhelp\n"[..];
        let mut output = Vec::new();
        run_console(input, &mut output, &handle, &config).unwrap();
        join.join().unwrap().unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("show sessions   live sessions"));
        assert!(output.contains("0 session(s)"));
        assert!(output.contains("listen            127.0.0.1:0"));
        assert!(output.contains("unknown command 'bogus'"));
        assert!(output.ends_with("shutting down\n"));
        assert!(!handle.is_running());
    }
}
