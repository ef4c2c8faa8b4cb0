//! Halt channel IPC: a one-line request/response protocol over a named pipe
//! (Windows) or a Unix domain socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  PING / DRYRUN / SHUTDOWN  ┌────────────────┐
//! │ IpcClient │───────────────────────────▶│    Service     │
//! │  (retry,  │◀───────────────────────────│ (serial loop)  │
//! │  backoff) │  PONG / OK / ACK / ERR     └───────┬────────┘
//! └───────────┘                                    │ ACK sent,
//!                                                  │ connection closed
//!                                          ┌───────▼────────┐
//!                                          │ShutdownInvoker │
//!                                          │(blocking task) │
//!                                          └────────────────┘
//! ```

pub mod client;
pub mod endpoint;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transient;

pub use client::{ClientOptions, IpcClient, IpcError};
pub use handler::{HandlerOutcome, dispatch, handle_connection};
pub use protocol::{Command, MAX_LINE_LEN, Response};
pub use server::{Service, ServiceError, ServiceOptions};
pub use transient::is_transient;
