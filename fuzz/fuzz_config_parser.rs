//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text through `AppConfig::parse()` and the `HALTD_*`
//! override path, looking for panics in parsing or validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(mut config) = haltd_config::AppConfig::parse(s) {
        // Reuse the same text as override values.
        let vars = s
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (format!("HALTD_{}", k.trim()), v.trim().to_string()));
        let _ = config.apply_env_overrides(vars);
    }
});
