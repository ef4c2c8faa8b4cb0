//! IPC client: sends one command line and waits for one response line.
//!
//! Every attempt opens a fresh channel. Transient failures (the service is
//! starting, restarting, or between two connections) are retried with
//! exponential backoff plus jitter; anything else is reported at once.

use std::io;
use std::time::Duration;

use haltd_config::ClientConfig;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::endpoint;
use super::protocol::MAX_LINE_LEN;
use super::transient::is_transient;
use crate::channel::{ChannelPath, address_of};

/// Upper bound of the random delay added to each backoff step.
const MAX_JITTER_MS: u64 = 100;

/// Errors from [`IpcClient::send`].
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("timeout waiting for a response on {path} after {timeout:?}")]
    Timeout { path: ChannelPath, timeout: Duration },

    #[error("channel {path} unavailable after {attempts} attempt(s): {source}")]
    ChannelUnavailable {
        path: ChannelPath,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Fatal(io::Error),

    #[error("connection to {path} closed before any response")]
    ConnectionClosed { path: ChannelPath },

    #[error("command must be a single line")]
    InvalidCommand,
}

impl IpcError {
    /// Whether the underlying condition could clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ChannelUnavailable { .. })
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub channel_name: String,
    /// Bound on one whole attempt: connect, write, read.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new("haltd")
    }
}

impl ClientOptions {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            timeout: Duration::from_millis(3000),
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.channel_name.clone())
            .with_timeout(Duration::from_millis(config.timeout_ms))
            .with_max_retries(config.max_retries)
            .with_initial_backoff(Duration::from_millis(config.initial_backoff_ms))
    }
}

/// Failure of a single attempt.
#[derive(Debug)]
enum AttemptError {
    Io(io::Error),
    Timeout,
    /// Peer closed without sending a byte.
    Closed,
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => is_transient(e),
            Self::Timeout => true,
            Self::Closed => false,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Timeout => f.write_str("attempt timeout"),
            Self::Closed => f.write_str("closed by peer"),
        }
    }
}

/// Per-`send` retry bookkeeping.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    delay: Duration,
    last_error: Option<AttemptError>,
}

/// Client for the halt channel.
#[derive(Debug, Clone)]
pub struct IpcClient {
    options: ClientOptions,
    path: ChannelPath,
}

impl IpcClient {
    pub fn new(options: ClientOptions) -> Self {
        let path = address_of(&options.channel_name);
        Self { options, path }
    }

    /// The resolved channel path.
    pub fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// Send `command` and return the trimmed response line.
    ///
    /// A command that timed out on the client side may still have reached
    /// the service; callers get at-least-once delivery.
    pub async fn send(&self, command: &str) -> Result<String, IpcError> {
        let command = command.trim_end_matches(['\r', '\n']);
        if command.contains(['\r', '\n']) {
            return Err(IpcError::InvalidCommand);
        }

        let mut state = RetryState::default();
        loop {
            let result = tokio::time::timeout(self.options.timeout, self.attempt(command))
                .await
                .unwrap_or(Err(AttemptError::Timeout));

            let err = match result {
                Ok(line) => {
                    debug!(
                        path = %self.path,
                        command,
                        response = %line,
                        attempts = state.attempt + 1,
                        "Channel response"
                    );
                    return Ok(line);
                }
                Err(err) => err,
            };

            if state.attempt >= self.options.max_retries || !err.is_transient() {
                state.last_error = Some(err);
                return Err(self.final_error(state));
            }

            state.delay = backoff_delay(self.options.initial_backoff, state.attempt);
            warn!(
                path = %self.path,
                attempt = state.attempt + 1,
                delay_ms = state.delay.as_millis() as u64,
                error = %err,
                "Channel attempt failed, retrying"
            );
            state.last_error = Some(err);
            tokio::time::sleep(state.delay).await;
            state.attempt += 1;
        }
    }

    async fn attempt(&self, command: &str) -> Result<String, AttemptError> {
        let mut stream = endpoint::connect(&self.path)
            .await
            .map_err(AttemptError::Io)?;

        let line = format!("{command}\n");
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(AttemptError::Io)?;
        stream.flush().await.map_err(AttemptError::Io)?;

        read_response(&mut stream).await
    }

    fn final_error(&self, state: RetryState) -> IpcError {
        let attempts = state.attempt + 1;
        match state.last_error {
            Some(AttemptError::Timeout) => IpcError::Timeout {
                path: self.path.clone(),
                timeout: self.options.timeout,
            },
            Some(AttemptError::Closed) => IpcError::ConnectionClosed {
                path: self.path.clone(),
            },
            Some(AttemptError::Io(source)) if is_transient(&source) => {
                IpcError::ChannelUnavailable {
                    path: self.path.clone(),
                    attempts,
                    source,
                }
            }
            Some(AttemptError::Io(source)) => IpcError::Fatal(source),
            None => IpcError::ChannelUnavailable {
                path: self.path.clone(),
                attempts,
                source: io::Error::from(io::ErrorKind::NotConnected),
            },
        }
    }
}

/// `initial * 2^attempt`, saturating.
pub fn base_backoff(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt))
}

/// Base backoff plus up to [`MAX_JITTER_MS`] of random delay.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..=MAX_JITTER_MS);
    base_backoff(initial, attempt).saturating_add(Duration::from_millis(jitter))
}

/// Read up to the first newline. Bytes after it are ignored.
async fn read_response<R>(reader: &mut R) -> Result<String, AttemptError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(n) => n,
            // A pipe peer that hangs up after a partial line surfaces as an error.
            Err(e)
                if !buf.is_empty()
                    && matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                    ) =>
            {
                0
            }
            Err(e) => return Err(AttemptError::Io(e)),
        };

        if n == 0 {
            if buf.is_empty() {
                return Err(AttemptError::Closed);
            }
            break;
        }

        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(pos);
            break;
        }
        if buf.len() > MAX_LINE_LEN {
            return Err(AttemptError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("response exceeds {MAX_LINE_LEN} bytes without a newline"),
            )));
        }
    }

    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.channel_name, "haltd");
        assert_eq!(options.timeout, Duration::from_secs(3));
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.initial_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_options_from_config() {
        let config = ClientConfig {
            channel_name: "/run/haltd.sock".to_string(),
            timeout_ms: 750,
            max_retries: 5,
            initial_backoff_ms: 10,
            ..ClientConfig::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(
            options,
            ClientOptions::new("/run/haltd.sock")
                .with_timeout(Duration::from_millis(750))
                .with_max_retries(5)
                .with_initial_backoff(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_base_backoff_doubles() {
        let initial = Duration::from_millis(200);
        assert_eq!(base_backoff(initial, 0), Duration::from_millis(200));
        assert_eq!(base_backoff(initial, 1), Duration::from_millis(400));
        assert_eq!(base_backoff(initial, 2), Duration::from_millis(800));
    }

    #[test]
    fn test_base_backoff_saturates() {
        let delay = base_backoff(Duration::from_secs(1), 200);
        assert_eq!(delay, Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_backoff_jitter_envelope() {
        let initial = Duration::from_millis(200);
        for attempt in 0..3 {
            for _ in 0..50 {
                let delay = backoff_delay(initial, attempt);
                let base = base_backoff(initial, attempt);
                assert!(delay >= base);
                assert!(delay <= base + Duration::from_millis(MAX_JITTER_MS));
            }
        }
    }

    #[tokio::test]
    async fn test_read_response_stops_at_newline() {
        let mut input: &[u8] = b"PONG\nignored trailing bytes";
        assert_eq!(read_response(&mut input).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn test_read_response_trims() {
        let mut input: &[u8] = b"  ACK shutdown \r\n";
        assert_eq!(read_response(&mut input).await.unwrap(), "ACK shutdown");
    }

    #[tokio::test]
    async fn test_read_response_partial_line_at_eof() {
        let mut input: &[u8] = b"OK dry";
        assert_eq!(read_response(&mut input).await.unwrap(), "OK dry");
    }

    #[tokio::test]
    async fn test_read_response_closed_without_data() {
        let mut input: &[u8] = b"";
        assert!(matches!(
            read_response(&mut input).await,
            Err(AttemptError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_read_response_rejects_unbounded_line() {
        let long = vec![b'x'; MAX_LINE_LEN * 2];
        let mut input: &[u8] = &long;
        match read_response(&mut input).await {
            Err(AttemptError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiline_command_is_rejected() {
        let client = IpcClient::new(ClientOptions::new("unused").with_max_retries(0));
        let err = client.send("PING\nSHUTDOWN").await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidCommand));
    }

    #[test]
    fn test_attempt_error_classification() {
        assert!(AttemptError::Timeout.is_transient());
        assert!(!AttemptError::Closed.is_transient());
        assert!(AttemptError::Io(io::ErrorKind::ConnectionRefused.into()).is_transient());
        assert!(!AttemptError::Io(io::ErrorKind::PermissionDenied.into()).is_transient());
    }

    #[test]
    fn test_timeout_error_mentions_timeout() {
        let err = IpcError::Timeout {
            path: address_of("x"),
            timeout: Duration::from_millis(100),
        };
        assert!(err.to_string().contains("timeout"));
        assert!(err.is_transient());
    }
}
