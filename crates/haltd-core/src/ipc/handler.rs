//! One connection, start to finish: read a command line, answer it, close.
//!
//! ```text
//! AwaitCommand ──▶ Dispatch ──▶ Respond ──▶ Close
//!   (deadline)                 (deadline,
//!                               flush, drain)
//! ```
//!
//! Every accepted connection gets exactly one response line, including
//! empty input and read timeouts. The halt itself is not started here: the
//! caller gets a [`HandlerOutcome`] once the connection is gone.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::endpoint::Connection;
use super::protocol::{Command, MAX_LINE_LEN, Response};
use super::server::{ServiceError, ServiceOptions};

/// How long to wait for the peer to hang up after the response is sent.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// What a connection produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub response: Response,
    /// Set only for an acknowledged `SHUTDOWN`.
    pub halt_requested: bool,
}

impl HandlerOutcome {
    fn respond(response: Response) -> Self {
        Self {
            response,
            halt_requested: false,
        }
    }
}

/// Map a parsed command to its response.
pub fn dispatch(command: Command, allow_dry_run: bool) -> HandlerOutcome {
    match command {
        Command::Ping => HandlerOutcome::respond(Response::Pong),
        Command::DryRun if allow_dry_run => HandlerOutcome::respond(Response::DryRunOk),
        Command::DryRun => HandlerOutcome::respond(Response::DryRunDisabled),
        Command::Shutdown => HandlerOutcome {
            response: Response::ShutdownAck,
            halt_requested: true,
        },
        Command::Unrecognized => HandlerOutcome::respond(Response::Unknown),
    }
}

enum Incoming {
    Line(Command),
    Empty,
    TimedOut,
}

/// Serve one connection and close it.
///
/// A halt is only reported as requested when the acknowledgement was
/// written successfully.
pub async fn handle_connection<C: Connection>(
    mut conn: C,
    options: &ServiceOptions,
) -> Result<HandlerOutcome, ServiceError> {
    let result = exchange(&mut conn, options).await;

    if result.is_ok() {
        drain(&mut conn).await;
    }
    if let Err(e) = conn.disconnect() {
        debug!(error = %e, "Disconnect failed");
    }
    drop(conn);

    result
}

async fn exchange<C: Connection>(
    conn: &mut C,
    options: &ServiceOptions,
) -> Result<HandlerOutcome, ServiceError> {
    let outcome = match read_command(conn, options.read_timeout).await? {
        Incoming::Line(command) => {
            debug!(%command, "Command received");
            dispatch(command, options.allow_dry_run)
        }
        Incoming::Empty => HandlerOutcome::respond(Response::Empty),
        Incoming::TimedOut => HandlerOutcome::respond(Response::Timeout),
    };

    let line = outcome.response.to_line();
    let write = async {
        conn.write_all(line.as_bytes()).await?;
        conn.flush().await
    };
    match with_deadline(options.write_timeout, write).await {
        Some(result) => result?,
        None => {
            return Err(ServiceError::WriteTimeout(
                options.write_timeout.unwrap_or_default(),
            ));
        }
    }

    Ok(outcome)
}

async fn read_command<C: Connection>(
    conn: &mut C,
    deadline: Option<Duration>,
) -> Result<Incoming, ServiceError> {
    let mut buf = Vec::with_capacity(64);
    let read = async {
        let mut reader = BufReader::new((&mut *conn).take(MAX_LINE_LEN as u64));
        reader.read_until(b'\n', &mut buf).await
    };

    let n = match with_deadline(deadline, read).await {
        Some(result) => result?,
        None => return Ok(Incoming::TimedOut),
    };

    if n == 0 {
        return Ok(Incoming::Empty);
    }
    if buf.len() >= MAX_LINE_LEN && buf.last() != Some(&b'\n') {
        return Ok(Incoming::Line(Command::Unrecognized));
    }
    Ok(Incoming::Line(Command::parse(&String::from_utf8_lossy(&buf))))
}

/// Half-close and wait briefly for the peer to hang up, so the response is
/// not lost when the channel is torn down.
async fn drain<C: Connection>(conn: &mut C) {
    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Half-close failed");
        return;
    }

    let wait_for_eof = async {
        let mut scratch = [0u8; 64];
        loop {
            match conn.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };
    if tokio::time::timeout(DRAIN_GRACE, wait_for_eof).await.is_err() {
        debug!("Peer still open after drain grace");
    }
}

/// Race `fut` against an optional deadline. `None` means it timed out.
async fn with_deadline<F: Future>(deadline: Option<Duration>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}
