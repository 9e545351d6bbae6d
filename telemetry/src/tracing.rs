use std::sync::Once;

use tracing_subscriber::EnvFilter;

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a binary.
///
/// The filter is taken from `RUST_LOG`, falling back to `info` when unset.
///
/// # Panics
///
/// Panics if a global subscriber was already installed.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test: initialization happens only once per process, and the
/// subscriber writes through the test writer so output is captured per test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .init();
    });
}
