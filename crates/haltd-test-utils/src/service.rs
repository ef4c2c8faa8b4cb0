//! A live halt service for integration tests.
//!
//! [`TestService`] runs the real service loop on a private channel (a socket
//! in a temp directory on Unix, a uniquely named pipe on Windows) with the
//! noop halt backend, and hands out clients pointed at it.

use std::sync::Arc;
use std::time::Duration;

use haltd_core::ipc::{ClientOptions, IpcClient, Service, ServiceError, ServiceOptions};
use haltd_core::{NoopHalt, ShutdownInvoker, ShutdownSignal};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A running service plus the handles to observe and stop it.
///
/// Dropping it stops the loop and deletes the temp directory.
pub struct TestService {
    channel_name: String,
    halt: NoopHalt,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    handle: Option<JoinHandle<Result<(), ServiceError>>>,
    _temp_dir: Option<TempDir>,
}

impl TestService {
    /// Start with default options and short deadlines.
    pub async fn start() -> Self {
        Self::start_with(Self::fast_options()).await
    }

    /// Start with `options`; the channel name is replaced by a private one.
    pub async fn start_with(options: ServiceOptions) -> Self {
        Self::start_with_halt(options, NoopHalt::new()).await
    }

    /// Start with a specific noop backend (e.g. [`NoopHalt::failing`]).
    pub async fn start_with_halt(mut options: ServiceOptions, halt: NoopHalt) -> Self {
        let (channel_name, temp_dir) = private_channel();
        options.channel_name = channel_name.clone();

        let service = Service::new(options, ShutdownInvoker::new(Arc::new(halt.clone())));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { service.run(shutdown_rx).await });

        let fixture = Self {
            channel_name,
            halt,
            shutdown_tx,
            handle: Some(handle),
            _temp_dir: temp_dir,
        };
        fixture.wait_until_ready().await;
        fixture
    }

    /// Service options with deadlines short enough for tests.
    pub fn fast_options() -> ServiceOptions {
        ServiceOptions::new("unused")
            .with_read_timeout(Some(Duration::from_millis(500)))
            .with_write_timeout(Some(Duration::from_millis(500)))
            .with_error_cooldown(Duration::from_millis(20))
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Client options for this service: 2s timeout, no retries.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new(self.channel_name.clone())
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(0)
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::new(self.client_options())
    }

    /// Halt requests that reached the backend.
    pub fn halt_invocations(&self) -> usize {
        self.halt.invocations()
    }

    /// Poll until the backend has seen `count` halt requests.
    pub async fn wait_for_halt_invocations(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.halt_invocations() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Stop the loop and return how it ended.
    pub async fn stop(mut self) -> Result<(), ServiceError> {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        match self.handle.take() {
            Some(handle) => handle.await.expect("service task panicked"),
            None => Ok(()),
        }
    }

    async fn wait_until_ready(&self) {
        let probe = IpcClient::new(
            ClientOptions::new(self.channel_name.clone())
                .with_timeout(Duration::from_millis(500))
                .with_max_retries(0),
        );
        for _ in 0..100 {
            if let Ok(response) = probe.send("PING").await
                && response == "PONG"
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("test service on {} never became ready", self.channel_name);
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(unix)]
fn private_channel() -> (String, Option<TempDir>) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("haltd.sock");
    let name = path.to_str().expect("temp path is not UTF-8").to_string();
    (name, Some(dir))
}

#[cfg(windows)]
fn private_channel() -> (String, Option<TempDir>) {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    (format!("haltd-test-{}-{id}", std::process::id()), None)
}
