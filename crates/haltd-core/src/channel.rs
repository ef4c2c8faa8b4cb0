//! Channel addressing: maps a logical service name to the OS rendezvous
//! object both sides connect to.
//!
//! The mapping is pure: the client and the service call [`address_of`] with
//! the same configured name and must land on the same named pipe (Windows)
//! or Unix domain socket.

use std::fmt;
use std::path::Path;

/// Namespace prefix of Windows named pipes.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Directory holding Unix sockets addressed by bare names.
pub const SOCKET_DIR: &str = "/tmp";

/// An OS-local channel identifier: a named-pipe path or a socket path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPath(String);

impl ChannelPath {
    /// The path as text, e.g. `\\.\pipe\haltd` or `/tmp/haltd.sock`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path as a filesystem path (meaningful for Unix sockets).
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a logical channel name for the current platform.
pub fn address_of(name: &str) -> ChannelPath {
    #[cfg(windows)]
    {
        pipe_address(name)
    }

    #[cfg(not(windows))]
    {
        socket_address(name)
    }
}

/// `\\.\pipe\<name>`; names already in the pipe namespace pass through.
pub fn pipe_address(name: &str) -> ChannelPath {
    let has_prefix = name
        .get(..PIPE_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(PIPE_PREFIX));
    if has_prefix {
        ChannelPath(name.to_string())
    } else {
        ChannelPath(format!("{PIPE_PREFIX}{name}"))
    }
}

/// `/tmp/<name>.sock`; a name containing `/` is already a socket path.
pub fn socket_address(name: &str) -> ChannelPath {
    if name.contains('/') {
        ChannelPath(name.to_string())
    } else {
        ChannelPath(format!("{SOCKET_DIR}/{name}.sock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pipe_address_from_name() {
        assert_eq!(pipe_address("haltd").as_str(), r"\\.\pipe\haltd");
    }

    #[test]
    fn test_pipe_address_keeps_full_path() {
        assert_eq!(pipe_address(r"\\.\pipe\Other").as_str(), r"\\.\pipe\Other");
        assert_eq!(pipe_address(r"\\.\PIPE\Other").as_str(), r"\\.\PIPE\Other");
    }

    #[test]
    fn test_socket_address_from_name() {
        assert_eq!(socket_address("haltd").as_str(), "/tmp/haltd.sock");
    }

    #[test]
    fn test_socket_address_keeps_path() {
        assert_eq!(
            socket_address("/run/haltd/control.sock").as_str(),
            "/run/haltd/control.sock"
        );
    }

    #[test]
    fn test_address_is_deterministic() {
        assert_eq!(address_of("haltd"), address_of("haltd"));
        assert_ne!(address_of("haltd"), address_of("other"));
    }

    #[test]
    fn test_display_matches_text() {
        let path = socket_address("x");
        assert_eq!(path.to_string(), path.as_str());
        assert_eq!(path.as_path(), Path::new("/tmp/x.sock"));
    }
}
