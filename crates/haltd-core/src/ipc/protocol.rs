//! Wire vocabulary of the halt channel.
//!
//! One UTF-8 line per direction per connection: the client writes a command,
//! the service answers with exactly one response line.

use std::fmt;

/// Upper bound on a command line, newline included. Longer input is never
/// a valid command.
pub const MAX_LINE_LEN: usize = 1024;

/// A parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe.
    Ping,
    /// Exercise the shutdown path without halting.
    DryRun,
    /// Power off the host.
    Shutdown,
    /// Anything else.
    Unrecognized,
}

impl Command {
    /// Parse a raw line: surrounding whitespace is ignored, matching is
    /// case-insensitive.
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_uppercase().as_str() {
            "PING" => Command::Ping,
            "DRYRUN" => Command::DryRun,
            "SHUTDOWN" => Command::Shutdown,
            _ => Command::Unrecognized,
        }
    }

    /// Canonical wire spelling. `None` for [`Command::Unrecognized`].
    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            Command::Ping => Some("PING"),
            Command::DryRun => Some("DRYRUN"),
            Command::Shutdown => Some("SHUTDOWN"),
            Command::Unrecognized => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire().unwrap_or("<unrecognized>"))
    }
}

/// A response line, without its terminating newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Pong,
    DryRunOk,
    DryRunDisabled,
    ShutdownAck,
    Unknown,
    Empty,
    Timeout,
}

impl Response {
    /// Every response the service can produce.
    pub const ALL: [Response; 7] = [
        Response::Pong,
        Response::DryRunOk,
        Response::DryRunDisabled,
        Response::ShutdownAck,
        Response::Unknown,
        Response::Empty,
        Response::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Pong => "PONG",
            Response::DryRunOk => "OK dryrun",
            Response::DryRunDisabled => "ERR dryrun-disabled",
            Response::ShutdownAck => "ACK shutdown",
            Response::Unknown => "ERR unknown",
            Response::Empty => "ERR empty",
            Response::Timeout => "ERR timeout",
        }
    }

    /// The response as written to the channel.
    pub fn to_line(&self) -> String {
        format!("{}\n", self.as_str())
    }

    /// Recognise a response line received by a client.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        Self::ALL.into_iter().find(|r| r.as_str() == line)
    }

    pub fn is_error(&self) -> bool {
        self.as_str().starts_with("ERR")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse("PING"), Command::Ping);
        assert_eq!(Command::parse("DRYRUN"), Command::DryRun);
        assert_eq!(Command::parse("SHUTDOWN"), Command::Shutdown);
    }

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        assert_eq!(Command::parse("  ping\r\n"), Command::Ping);
        assert_eq!(Command::parse("\tDryRun "), Command::DryRun);
        assert_eq!(Command::parse("shutdown\n"), Command::Shutdown);
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(Command::parse(""), Command::Unrecognized);
        assert_eq!(Command::parse("REBOOT"), Command::Unrecognized);
        assert_eq!(Command::parse("PING PING"), Command::Unrecognized);
        assert_eq!(Command::parse("SHUT DOWN"), Command::Unrecognized);
    }

    #[test]
    fn test_response_lines_are_single_terminated_lines() {
        for response in Response::ALL {
            let line = response.to_line();
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1, "{response:?}");
            assert!(line.len() < MAX_LINE_LEN);
        }
    }

    #[test]
    fn test_response_vocabulary() {
        assert_eq!(Response::Pong.as_str(), "PONG");
        assert_eq!(Response::DryRunOk.as_str(), "OK dryrun");
        assert_eq!(Response::DryRunDisabled.as_str(), "ERR dryrun-disabled");
        assert_eq!(Response::ShutdownAck.as_str(), "ACK shutdown");
        assert_eq!(Response::Unknown.as_str(), "ERR unknown");
        assert_eq!(Response::Empty.as_str(), "ERR empty");
        assert_eq!(Response::Timeout.as_str(), "ERR timeout");
    }

    #[test]
    fn test_response_from_line() {
        assert_eq!(Response::from_line("ACK shutdown\n"), Some(Response::ShutdownAck));
        assert_eq!(Response::from_line("ACK"), None);
    }

    #[test]
    fn test_error_responses() {
        let errors: Vec<_> = Response::ALL.into_iter().filter(Response::is_error).collect();
        assert_eq!(
            errors,
            vec![
                Response::DryRunDisabled,
                Response::Unknown,
                Response::Empty,
                Response::Timeout
            ]
        );
    }
}
