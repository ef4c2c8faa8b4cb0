//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use haltd_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .channel_name("/tmp/test.sock")
///     .allow_dry_run(false)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    /// Defaults plus the noop halt backend, so nothing built from this can
    /// power off the test host.
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.service.halt_backend = "noop".to_string();
        Self { config }
    }

    /// Sets the channel for both the service and the client.
    pub fn channel_name(mut self, name: &str) -> Self {
        self.config.service.channel_name = name.to_string();
        self.config.client.channel_name = name.to_string();
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.service.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.service.write_timeout_ms = ms;
        self
    }

    pub fn allow_dry_run(mut self, allow: bool) -> Self {
        self.config.service.allow_dry_run = allow;
        self
    }

    pub fn error_cooldown_ms(mut self, ms: u64) -> Self {
        self.config.service.error_cooldown_ms = ms;
        self
    }

    pub fn halt_backend(mut self, backend: &str) -> Self {
        self.config.service.halt_backend = backend.to_string();
        self
    }

    pub fn client_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.timeout_ms = ms;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.client.max_retries = retries;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.client.initial_backoff_ms = ms;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
