//! Daemon process: builds the service from configuration and runs it until a
//! shutdown signal or a termination signal arrives.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use haltd_config::AppConfig;

use crate::halt::{BackendPreference, PrivilegedHalt, ShutdownInvoker, select_backend};
use crate::ipc::{Service, ServiceError, ServiceOptions};

/// Shutdown signal sent via broadcast channel. Stops the service loop; it
/// never halts the host.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The haltd daemon.
pub struct Daemon {
    config: AppConfig,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    /// Create a new daemon instance with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
            _shutdown_rx,
        }
    }

    /// Build the service with the configured halt backend.
    pub fn service(&self) -> Result<Service, DaemonError> {
        let preference = self
            .config
            .service
            .halt_backend
            .parse::<BackendPreference>()
            .map_err(|e| DaemonError::Startup(e.to_string()))?;
        let backend = select_backend(preference, &self.config.service.halt_command);
        Ok(self.service_with_backend(backend))
    }

    /// Build the service around an explicit halt backend.
    pub fn service_with_backend(&self, backend: Arc<dyn PrivilegedHalt>) -> Service {
        let options = ServiceOptions::from(&self.config.service);
        Service::new(options, ShutdownInvoker::new(backend))
    }

    /// Run the daemon until a shutdown signal, Ctrl-C or SIGTERM.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let service = self.service()?;
        info!(
            path = %service.path(),
            halt_backend = %self.config.service.halt_backend,
            "haltd daemon starting"
        );

        let served = service.run(self.shutdown_tx.subscribe());
        tokio::pin!(served);

        tokio::select! {
            result = &mut served => result?,
            signal = termination() => {
                let signal = signal?;
                warn!(signal, "Termination signal received, initiating graceful shutdown");
                self.shutdown();
                served.await?;
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful stop of the service loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Subscribe to shutdown signals.
    pub fn shutdown_subscriber(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Get a reference to the daemon's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Wait for Ctrl-C, or SIGTERM on Unix. Returns the signal's name.
async fn termination() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl-C")
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
