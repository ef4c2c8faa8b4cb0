//! Platform channel endpoints.
//!
//! | Platform | Service side | Client side |
//! |----------|--------------|-------------|
//! | Unix | `UnixListener` on a socket file | `UnixStream` |
//! | Windows | one `NamedPipeServer` instance per connection | `NamedPipeClient` |
//!
//! Both modules export the same surface: `Endpoint::bind`,
//! `Endpoint::accept`, `connect`, and the `ServerStream` / `ClientStream`
//! aliases. The handler only sees the [`Connection`] trait.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::{ClientStream, Endpoint, ServerStream, connect};
#[cfg(windows)]
pub use windows::{ClientStream, Endpoint, ServerStream, connect};

/// A service-side byte stream bound to one peer.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {
    /// Release the OS channel so the next peer can connect. Called once,
    /// after the response has been drained, before the stream is dropped.
    fn disconnect(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory pipes stand in for a channel in handler tests.
impl Connection for DuplexStream {}
