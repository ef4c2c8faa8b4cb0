//! Retryable vs fatal channel failures.
//!
//! The service may not be listening yet, or may be between two connections
//! when a client dials in. Those races surface as the error kinds below and
//! clear up on their own; everything else is a caller or host problem.

use std::io;

/// Whether a failed channel operation is worth retrying.
pub fn is_transient(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    matches!(
        err.kind(),
        ConnectionRefused | NotFound | BrokenPipe | ConnectionReset | TimedOut
    ) || is_pipe_busy(err)
        || err.to_string().to_ascii_lowercase().contains("timeout")
}

/// All instances of the named pipe are taken (service mid-handoff).
#[cfg(windows)]
fn is_pipe_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(windows_sys::Win32::Foundation::ERROR_PIPE_BUSY as i32)
}

#[cfg(not(windows))]
fn is_pipe_busy(_err: &io::Error) -> bool {
    false
}
