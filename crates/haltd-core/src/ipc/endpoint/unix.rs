//! Unix domain socket endpoint.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use super::Connection;
use crate::channel::ChannelPath;

pub type ServerStream = UnixStream;
pub type ClientStream = UnixStream;

impl Connection for UnixStream {}

/// A bound socket file. The file is removed when the endpoint is dropped.
pub struct Endpoint {
    listener: UnixListener,
    path: ChannelPath,
}

impl Endpoint {
    /// Bind the socket and apply `mode` to the socket file.
    ///
    /// A leftover socket file from a crashed process is removed first. If a
    /// live service still answers on it, binding fails with `AddrInUse`.
    /// Anything at the path that is not a socket is left untouched and
    /// binding fails with `AlreadyExists`.
    pub async fn bind(path: &ChannelPath, mode: u32) -> io::Result<Self> {
        let socket_path = path.as_path();
        if let Ok(meta) = tokio::fs::symlink_metadata(socket_path).await {
            if !meta.file_type().is_socket() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("channel path exists and is not a socket: {path}"),
                ));
            }
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("channel already served by a running instance: {path}"),
                ));
            }
            info!(path = %path, "Removing stale socket file");
            tokio::fs::remove_file(socket_path).await?;
        }

        if let Some(parent) = socket_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                debug!(path = %parent.display(), error = %e, "Could not create socket directory");
            }
        }

        let listener = UnixListener::bind(socket_path)?;
        let endpoint = Self {
            listener,
            path: path.clone(),
        };
        tokio::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(mode)).await?;
        info!(path = %path, mode = %format_args!("{mode:#o}"), "Channel listening");

        Ok(endpoint)
    }

    /// Wait for the next peer.
    pub async fn accept(&mut self) -> io::Result<ServerStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.path.as_path()) {
            debug!(path = %self.path, error = %e, "Socket file already gone");
        }
    }
}

/// Open a client connection to the socket at `path`.
pub async fn connect(path: &ChannelPath) -> io::Result<ClientStream> {
    UnixStream::connect(path.as_path()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::socket_address;
    use tempfile::TempDir;

    fn temp_channel(dir: &TempDir) -> ChannelPath {
        socket_address(dir.path().join("test.sock").to_str().unwrap())
    }

    #[tokio::test]
    async fn test_bind_applies_mode_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = temp_channel(&dir);

        let endpoint = Endpoint::bind(&path, 0o600).await.unwrap();
        let mode = std::fs::metadata(path.as_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(endpoint);
        assert!(!path.as_path().exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = temp_channel(&dir);

        // A socket file nobody listens on any more.
        let stale = std::os::unix::net::UnixListener::bind(path.as_path()).unwrap();
        drop(stale);
        assert!(path.as_path().exists());

        let endpoint = Endpoint::bind(&path, 0o666).await;
        assert!(endpoint.is_ok());
    }

    #[tokio::test]
    async fn test_bind_leaves_regular_file_alone() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("important.conf");
        std::fs::write(&file, b"precious data").unwrap();
        let path = socket_address(file.to_str().unwrap());

        let err = Endpoint::bind(&path, 0o666).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(std::fs::metadata(&file).unwrap().is_file());
        assert_eq!(std::fs::read(&file).unwrap(), b"precious data");
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = TempDir::new().unwrap();
        let path = temp_channel(&dir);

        let _live = Endpoint::bind(&path, 0o666).await.unwrap();
        let err = Endpoint::bind(&path, 0o666).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_accept_and_connect() {
        let dir = TempDir::new().unwrap();
        let path = temp_channel(&dir);
        let mut endpoint = Endpoint::bind(&path, 0o666).await.unwrap();

        let (server, client) = tokio::join!(endpoint.accept(), connect(&path));
        assert!(server.is_ok());
        assert!(client.is_ok());
    }
}
