//! Test fixture loading utilities

use std::path::PathBuf;
use std::sync::Arc;

use pidgate_core::Registry;

/// Get the path to a fixture file or directory
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_fixtures")
        .join(name)
}

/// Load a fixture file as a string
pub fn load_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", name))
}

/// Load a recorded repository response
pub fn load_response_fixture(name: &str) -> String {
    load_fixture(&format!("responses/{}", name))
}

/// The registry of every descriptor under `test_fixtures/repositories`
pub fn fixture_registry() -> Arc<Registry> {
    Arc::new(Registry::load_dir(fixture_path("repositories")).expect("fixture registry loads"))
}

/// Route `tracing` output through the test harness, honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
