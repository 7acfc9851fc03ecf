//! Tracing/logging setup shared by the binary and tests.

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize process-wide tracing with defaults taken from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

/// Human-readable output routed through the test harness writer.
pub fn init_for_tests() {
    tracing::init_test();
}
