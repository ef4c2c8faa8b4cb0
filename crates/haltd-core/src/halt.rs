//! Privileged halt: powers off the host.
//!
//! The service never talks to the OS directly. It holds a
//! [`ShutdownInvoker`] wrapping one [`PrivilegedHalt`] backend:
//!
//! | Backend | Platform | Privilege step | Halt step |
//! |---------|----------|----------------|-----------|
//! | [`WindowsHalt`] | Windows | enable `SeShutdownPrivilege` | `InitiateSystemShutdownExW` |
//! | [`CommandHalt`] | Unix | `CAP_SYS_BOOT` check (Linux default command) | run the power-off command |
//! | [`NoopHalt`] | any | none | log and count |
//!
//! Backend calls block; the service runs them on a blocking task.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(unix)]
mod command;
mod noop;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use command::{CommandHalt, has_capability};
pub use noop::NoopHalt;
#[cfg(windows)]
pub use windows::WindowsHalt;

/// Errors from a halt backend.
#[derive(Debug, thiserror::Error)]
pub enum HaltError {
    #[error("privilege not held: {0}")]
    Privilege(String),

    #[error("shutdown request failed: {0}")]
    Request(String),

    #[error("halt not supported: {0}")]
    Unsupported(String),
}

// ── Backend trait ───────────────────────────────────────────────────────

/// A way of halting the host.
pub trait PrivilegedHalt: Send + Sync {
    /// Short backend name for logs (e.g. "windows", "command", "noop").
    fn name(&self) -> &str;

    /// Make sure the process may halt the host.
    fn acquire_privilege(&self) -> Result<(), HaltError>;

    /// Request the power-off.
    fn halt(&self) -> Result<(), HaltError>;

    /// Acquire the privilege, then halt.
    fn invoke(&self) -> Result<(), HaltError> {
        self.acquire_privilege()?;
        self.halt()
    }
}

// ── Invoker ─────────────────────────────────────────────────────────────

/// Result of one shutdown attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub ok: bool,
    pub message: String,
}

/// Runs the configured backend and turns its result into a
/// [`ShutdownOutcome`]. Never returns an error.
#[derive(Clone)]
pub struct ShutdownInvoker {
    backend: Arc<dyn PrivilegedHalt>,
}

impl ShutdownInvoker {
    pub fn new(backend: Arc<dyn PrivilegedHalt>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn try_shutdown(&self) -> ShutdownOutcome {
        match self.backend.invoke() {
            Ok(()) => ShutdownOutcome {
                ok: true,
                message: "Shutdown initiated".to_string(),
            },
            Err(e) => ShutdownOutcome {
                ok: false,
                message: e.to_string(),
            },
        }
    }
}

impl fmt::Debug for ShutdownInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownInvoker")
            .field("backend", &self.backend.name())
            .finish()
    }
}

// ── Backend selection ───────────────────────────────────────────────────

/// Halt backend preference, from `service.halt_backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// The platform's native backend.
    #[default]
    Auto,
    /// Never halt (development only).
    Noop,
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => write!(f, "auto"),
            BackendPreference::Noop => write!(f, "noop"),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = HaltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "noop" => Ok(BackendPreference::Noop),
            other => Err(HaltError::Unsupported(format!("unknown halt backend '{other}'"))),
        }
    }
}

/// Pick the halt backend for this platform.
///
/// `halt_command` overrides the Unix power-off command; it is ignored
/// elsewhere.
pub fn select_backend(
    preference: BackendPreference,
    halt_command: &[String],
) -> Arc<dyn PrivilegedHalt> {
    match preference {
        BackendPreference::Noop => Arc::new(NoopHalt::new()),
        BackendPreference::Auto => native_backend(halt_command),
    }
}

#[cfg(windows)]
fn native_backend(halt_command: &[String]) -> Arc<dyn PrivilegedHalt> {
    if !halt_command.is_empty() {
        tracing::warn!("halt_command is ignored on Windows");
    }
    Arc::new(WindowsHalt)
}

#[cfg(unix)]
fn native_backend(halt_command: &[String]) -> Arc<dyn PrivilegedHalt> {
    if halt_command.is_empty() {
        Arc::new(CommandHalt::platform_default())
    } else {
        Arc::new(CommandHalt::new(halt_command.to_vec()))
    }
}

#[cfg(not(any(unix, windows)))]
fn native_backend(_halt_command: &[String]) -> Arc<dyn PrivilegedHalt> {
    tracing::warn!("No native halt available, falling back to noop backend");
    Arc::new(NoopHalt::new())
}

// ── Tests ───────────────────────────────────────────────────────────────
