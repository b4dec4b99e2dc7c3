//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

pub fn plan_fixture() -> PathBuf {
    fixture_path("allreduce_plan.json")
}

/// A collbench command isolated from the caller's config files and
/// network interfaces
///
/// HOME points at `home` so no user configuration is picked up, and a
/// static endpoint replaces interface discovery.
pub fn collbench_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("collbench").unwrap();
    cmd.env_remove("COLLBENCH_CONFIG")
        .env_remove("RUST_LOG")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("COLLBENCH_STATIC_ENDPOINT", "test0:10.0.0.5");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_exist() {
        assert!(valid_config_fixture().exists());
        assert!(invalid_config_fixture().exists());
        assert!(plan_fixture().exists());
    }
}
