#![deny(unsafe_code)]

//! Configuration loading and validation for haltd.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the service (`[service]`), the
//! client-side tooling (`[client]`) and log setup (`[logging]`).
//!
//! Values are read once at process start. `HALTD_*` environment variables
//! can override individual fields after the file has been parsed, see
//! [`AppConfig::apply_env_overrides`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prefix shared by all environment overrides.
pub const ENV_PREFIX: &str = "HALTD_";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Background service configuration.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Client configuration used by the CLI.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the privileged background service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical channel name. Mapped to `\\.\pipe\<name>` on Windows and
    /// `/tmp/<name>.sock` on Unix; a name containing `/` is used as a path.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,

    /// Deadline for the command line to arrive, in milliseconds (0 = none).
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Deadline for writing the response line, in milliseconds (0 = none).
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Whether `DRYRUN` is answered with `OK dryrun`.
    #[serde(default = "default_true")]
    pub allow_dry_run: bool,

    /// Pause after a failed connection before accepting again, in milliseconds.
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,

    /// Halt backend: "auto" (platform native) or "noop".
    #[serde(default = "default_halt_backend")]
    pub halt_backend: String,

    /// Power-off command for the Unix backend. Empty selects the platform
    /// default (`systemctl poweroff` on Linux, `shutdown -h now` elsewhere).
    #[serde(default)]
    pub halt_command: Vec<String>,

    /// Permission bits applied to the Unix socket file.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            allow_dry_run: true,
            error_cooldown_ms: default_error_cooldown_ms(),
            halt_backend: default_halt_backend(),
            halt_command: Vec::new(),
            socket_mode: default_socket_mode(),
        }
    }
}

fn default_channel_name() -> String {
    "haltd".to_string()
}

fn default_io_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_error_cooldown_ms() -> u64 {
    1000
}

fn default_halt_backend() -> String {
    "auto".to_string()
}

fn default_socket_mode() -> u32 {
    0o666
}

/// Configuration for callers of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Logical channel name; must match `service.channel_name`.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,

    /// Per-attempt deadline for connect + write + response, in milliseconds.
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay, doubled on every retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Send `DRYRUN` instead of `SHUTDOWN` from `haltd request`.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Ask for confirmation before `haltd request` sends anything.
    #[serde(default = "default_true")]
    pub confirm: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            timeout_ms: default_client_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            dry_run: true,
            confirm: true,
        }
    }
}

fn default_client_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    200
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HALTD_*` overrides from the process environment.
    pub fn with_process_env(mut self) -> Result<Self, ConfigError> {
        self.apply_env_overrides(std::env::vars())?;
        Ok(self)
    }

    /// Apply `HALTD_*` overrides from the given key/value pairs, then
    /// re-validate.
    ///
    /// `HALTD_CHANNEL_NAME` sets the channel on both the service and the
    /// client side. Keys without the prefix are ignored, as are unknown
    /// `HALTD_*` keys.
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let invalid = || ConfigError::Env {
                key: key.to_string(),
                value: value.to_string(),
            };

            match name {
                "CHANNEL_NAME" => {
                    self.service.channel_name = value.to_string();
                    self.client.channel_name = value.to_string();
                }
                "READ_TIMEOUT_MS" => {
                    self.service.read_timeout_ms = value.parse().map_err(|_| invalid())?
                }
                "WRITE_TIMEOUT_MS" => {
                    self.service.write_timeout_ms = value.parse().map_err(|_| invalid())?
                }
                "ALLOW_DRY_RUN" => {
                    self.service.allow_dry_run = parse_bool(value).ok_or_else(invalid)?
                }
                "ERROR_COOLDOWN_MS" => {
                    self.service.error_cooldown_ms = value.parse().map_err(|_| invalid())?
                }
                "HALT_BACKEND" => self.service.halt_backend = value.to_string(),
                "CLIENT_TIMEOUT_MS" => {
                    self.client.timeout_ms = value.parse().map_err(|_| invalid())?
                }
                "MAX_RETRIES" => self.client.max_retries = value.parse().map_err(|_| invalid())?,
                "INITIAL_BACKOFF_MS" => {
                    self.client.initial_backoff_ms = value.parse().map_err(|_| invalid())?
                }
                "LOG_LEVEL" => self.logging.level = value.to_string(),
                _ => debug!(key, "Ignoring unknown environment override"),
            }
        }

        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel_name("service.channel_name", &self.service.channel_name)?;
        validate_channel_name("client.channel_name", &self.client.channel_name)?;

        // Same normalisation as `BackendPreference::from_str`.
        let valid_backends = ["auto", "noop"];
        let backend = self.service.halt_backend.trim().to_ascii_lowercase();
        if !valid_backends.contains(&backend.as_str()) {
            return Err(ConfigError::Validation(format!(
                "service.halt_backend must be one of {:?}, got {:?}",
                valid_backends, self.service.halt_backend
            )));
        }
        if let Some(program) = self.service.halt_command.first()
            && program.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "service.halt_command[0] must name a program".to_string(),
            ));
        }
        if self.service.socket_mode > 0o777 {
            return Err(ConfigError::Validation(format!(
                "service.socket_mode must be at most 0o777, got {:#o}",
                self.service.socket_mode
            )));
        }

        if self.client.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_channel_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} must not be empty")));
    }
    if name.contains(['\n', '\r', '\0']) {
        return Err(ConfigError::Validation(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
