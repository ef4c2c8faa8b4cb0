//! Fuzz target for the wire command parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_command_parser
//!
//! Every input must map to exactly one response line.

#![no_main]

use haltd_core::ipc::{Command, MAX_LINE_LEN, dispatch};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(&data[..data.len().min(MAX_LINE_LEN)]);
    let command = Command::parse(&line);

    for allow_dry_run in [true, false] {
        let outcome = dispatch(command, allow_dry_run);
        let wire = outcome.response.to_line();
        assert!(wire.ends_with('\n'));
        assert_eq!(wire.matches('\n').count(), 1);
        assert_eq!(outcome.halt_requested, command == Command::Shutdown);
    }
});
