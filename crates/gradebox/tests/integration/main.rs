//! Integration tests for gradebox
//!
//! Tests that touch isolate require the binary to be installed and accessible.
//! Run with: cargo test -p gradebox --features integration-tests
//!
//! Tests that require root are marked `#[ignore]`. To include them:
//!    cargo test -p gradebox --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::path::PathBuf;

use gradebox::config::Config;

mod config_loading;
mod grading;
mod meta_file_fixtures;
mod project_loading;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

pub(crate) fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(FIXTURES_PATH).join(relative)
}

/// Create a test config with cgroup support if available, falling back to non-cgroup mode.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    if config.cgroup {
        match gradebox::prepare_cgroup(&config.cg_root) {
            Ok(true) => {}              // cgroups ready
            _ => config.cgroup = false, // not available, fall back
        }
    }
    config
}
