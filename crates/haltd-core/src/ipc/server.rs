//! Service loop: accepts connections one at a time and runs the handler.
//!
//! Strictly serial. The next accept only happens once the previous
//! connection has been answered and closed, so commands are processed in OS
//! accept order. The only work that outlives a connection is the halt,
//! which runs on a detached blocking task.

use std::io;
use std::time::Duration;

use haltd_config::ServiceConfig;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::endpoint::Endpoint;
use super::handler::{HandlerOutcome, handle_connection};
use crate::channel::{ChannelPath, address_of};
use crate::daemon::ShutdownSignal;
use crate::halt::ShutdownInvoker;

/// Errors from the service loop and its connections.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind channel {path}: {source}")]
    Bind {
        path: ChannelPath,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("response write timed out after {0:?}")]
    WriteTimeout(Duration),
}

impl ServiceError {
    /// Another instance owns the channel; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }

    /// The endpoint itself is suspect and must be recreated.
    fn resets_endpoint(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Accept(_))
    }
}

/// Service loop settings. Fixed for the lifetime of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub channel_name: String,
    /// `None` waits for the command line indefinitely.
    pub read_timeout: Option<Duration>,
    /// `None` writes the response without a deadline.
    pub write_timeout: Option<Duration>,
    pub allow_dry_run: bool,
    /// Pause after a failed connection before accepting again.
    pub error_cooldown: Duration,
    /// Unix socket permission bits.
    pub socket_mode: u32,
}

impl ServiceOptions {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            read_timeout: Some(Duration::from_millis(5000)),
            write_timeout: Some(Duration::from_millis(5000)),
            allow_dry_run: true,
            error_cooldown: Duration::from_millis(1000),
            socket_mode: 0o666,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_allow_dry_run(mut self, allow: bool) -> Self {
        self.allow_dry_run = allow;
        self
    }

    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }
}

impl From<&ServiceConfig> for ServiceOptions {
    fn from(config: &ServiceConfig) -> Self {
        Self::new(config.channel_name.clone())
            .with_read_timeout(millis_or_none(config.read_timeout_ms))
            .with_write_timeout(millis_or_none(config.write_timeout_ms))
            .with_allow_dry_run(config.allow_dry_run)
            .with_error_cooldown(Duration::from_millis(config.error_cooldown_ms))
            .with_socket_mode(config.socket_mode)
    }
}

fn millis_or_none(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// The halt service.
pub struct Service {
    options: ServiceOptions,
    path: ChannelPath,
    invoker: ShutdownInvoker,
}

impl Service {
    pub fn new(options: ServiceOptions, invoker: ShutdownInvoker) -> Self {
        let path = address_of(&options.channel_name);
        Self {
            options,
            path,
            invoker,
        }
    }

    /// The resolved channel path.
    pub fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// Serve connections until a shutdown signal arrives.
    ///
    /// Connection failures are logged and followed by a cooldown. Only a
    /// channel already owned by another live instance ends the loop with an
    /// error.
    pub async fn run(
        &self,
        mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<(), ServiceError> {
        info!(
            path = %self.path,
            backend = self.invoker.backend_name(),
            allow_dry_run = self.options.allow_dry_run,
            "Halt service starting"
        );

        let mut endpoint: Option<Endpoint> = None;

        loop {
            let result = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping halt service");
                    break;
                }
                result = self.serve_next(&mut endpoint) => result,
            };

            match result {
                Ok(outcome) if outcome.response.is_error() => {
                    warn!(response = %outcome.response, "Request rejected");
                }
                Ok(outcome) => {
                    info!(
                        response = %outcome.response,
                        halt = outcome.halt_requested,
                        "Connection handled"
                    );
                    if outcome.halt_requested {
                        self.spawn_halt();
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Channel unavailable");
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        cooldown = ?self.options.error_cooldown,
                        "Connection failed"
                    );
                    if e.resets_endpoint() {
                        endpoint = None;
                    }
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Shutdown signal received during cooldown");
                            break;
                        }
                        _ = tokio::time::sleep(self.options.error_cooldown) => {}
                    }
                }
            }
        }

        drop(endpoint);
        info!(path = %self.path, "Halt service stopped");
        Ok(())
    }

    /// Bind if needed, accept one connection and serve it to completion.
    async fn serve_next(
        &self,
        slot: &mut Option<Endpoint>,
    ) -> Result<HandlerOutcome, ServiceError> {
        let endpoint = match slot.take() {
            Some(endpoint) => endpoint,
            None => Endpoint::bind(&self.path, self.options.socket_mode)
                .await
                .map_err(|source| ServiceError::Bind {
                    path: self.path.clone(),
                    source,
                })?,
        };
        let endpoint = slot.insert(endpoint);

        let conn = endpoint.accept().await.map_err(ServiceError::Accept)?;
        handle_connection(conn, &self.options).await
    }

    /// Start the halt on a blocking task. Nothing waits for it; the outcome
    /// is only logged.
    fn spawn_halt(&self) {
        let invoker = self.invoker.clone();
        info!(backend = invoker.backend_name(), "Shutdown acknowledged, invoking halt");

        let task = tokio::task::spawn_blocking(move || invoker.try_shutdown());
        tokio::spawn(async move {
            match task.await {
                Ok(outcome) if outcome.ok => info!(detail = %outcome.message, "Shutdown initiated"),
                Ok(outcome) => error!(detail = %outcome.message, "Shutdown failed"),
                Err(e) => error!(error = %e, "Shutdown task panicked"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_options_from_default_config() {
        let options = ServiceOptions::from(&ServiceConfig::default());
        assert_eq!(options, ServiceOptions::new("haltd"));
    }

    #[test]
    fn test_zero_timeouts_disable_deadlines() {
        let config = ServiceConfig {
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            allow_dry_run: false,
            error_cooldown_ms: 10,
            socket_mode: 0o600,
            ..ServiceConfig::default()
        };
        let options = ServiceOptions::from(&config);
        assert_eq!(options.read_timeout, None);
        assert_eq!(options.write_timeout, None);
        assert!(!options.allow_dry_run);
        assert_eq!(options.error_cooldown, Duration::from_millis(10));
        assert_eq!(options.socket_mode, 0o600);
    }

    #[test]
    fn test_only_addr_in_use_is_fatal() {
        let bind = |kind: io::ErrorKind| ServiceError::Bind {
            path: address_of("x"),
            source: kind.into(),
        };
        assert!(bind(io::ErrorKind::AddrInUse).is_fatal());
        assert!(!bind(io::ErrorKind::PermissionDenied).is_fatal());
        assert!(!ServiceError::Accept(io::ErrorKind::Other.into()).is_fatal());
        assert!(!ServiceError::WriteTimeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_endpoint_reset_policy() {
        assert!(ServiceError::Accept(io::ErrorKind::Other.into()).resets_endpoint());
        assert!(!ServiceError::Io(io::ErrorKind::BrokenPipe.into()).resets_endpoint());
        assert!(!ServiceError::WriteTimeout(Duration::from_secs(1)).resets_endpoint());
    }
}
