//! Common test utilities shared across integration tests

pub mod fake_runtime;
pub mod fixtures;

// Re-export commonly used items
pub use fake_runtime::*;
pub use fixtures::*;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("previewkit_sandbox=debug")
        .with_test_writer()
        .try_init();
}
