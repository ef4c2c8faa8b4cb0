#![deny(unsafe_code)]

//! haltd core runtime.
//!
//! A small local service that powers off the host on request, and the client
//! used to ask it. Callers never need the shutdown privilege themselves: they
//! send one line over a local channel and the privileged service acts on it.

/// Logical channel name to OS path mapping.
pub mod channel;
/// Daemon lifecycle and shutdown signalling.
pub mod daemon;
/// Privileged halt backends.
pub mod halt;
/// Wire protocol, client, connection handler and service loop.
pub mod ipc;

pub use channel::{ChannelPath, address_of};
pub use daemon::{Daemon, DaemonError, ShutdownSignal};
pub use halt::{
    BackendPreference, HaltError, NoopHalt, PrivilegedHalt, ShutdownInvoker, ShutdownOutcome,
    select_backend,
};
pub use ipc::{ClientOptions, IpcClient, IpcError, Service, ServiceError, ServiceOptions};
