//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that emits tracing events
//! and wants them shown by the test harness. The subscriber is installed at
//! most once per process, so every test may call it.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber writing to the test-harness writer.
///
/// Respects `RUST_LOG`; defaults to `haltd_core=debug` so service and client
/// decisions show up in failing test output.
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     haltd_test_utils::tracing_setup::init_test_tracing();
///     tracing::info!("visible on failure");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("haltd_core=debug,info")),
        )
        .with_test_writer()
        .try_init();
}
