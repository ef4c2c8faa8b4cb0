#![deny(unsafe_code)]

//! Shared test utilities for the haltd workspace.
//!
//! Provides reusable fixtures, config builders, and tracing helpers so that
//! individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! haltd-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod log_capture;
pub mod service;
pub mod tracing_setup;

pub use log_capture::LogCapture;
pub use service::TestService;
