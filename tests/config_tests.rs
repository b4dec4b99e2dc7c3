//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the `config` subcommands.

mod common;

use std::fs;
use std::path::PathBuf;

use common::{collbench_cmd, invalid_config_fixture, valid_config_fixture};
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture for configuration testing
struct ConfigFixture {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("collbench.toml");
        Self { temp_dir, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn validate(&self) -> assert_cmd::assert::Assert {
        collbench_cmd(&self.temp_dir)
            .args(["config", "validate", "--config", self.path()])
            .assert()
    }

    /// Validate without the pinned test endpoint so the file's own wins
    fn validate_unpinned(&self) -> assert_cmd::assert::Assert {
        collbench_cmd(&self.temp_dir)
            .env_remove("COLLBENCH_STATIC_ENDPOINT")
            .args(["config", "validate", "--config", self.path()])
            .assert()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_default_config_is_valid() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_empty_sections_use_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[rendezvous]

[benchmark]

[cluster]

[logging]
"#,
    );
    fixture.validate().success();
}

#[test]
fn test_valid_fixture() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .args(["config", "validate", "--config"])
        .arg(valid_config_fixture())
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_root_rank_outside_group() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .args(["config", "validate", "--config"])
        .arg(invalid_config_fixture())
        .assert()
        .code(10)
        .stderr(predicate::str::contains("root rank 4"));
}

#[test]
fn test_zero_replays() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[benchmark]
replays = 0
"#,
    );
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("must be at least 1"));
}

#[test]
fn test_unknown_aggregation() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[benchmark]
aggregation = "median"
"#,
    );
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("parse"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "loud"
"#,
    );
    fixture
        .validate()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[benchmark\niterations = ");
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("E101"));
}

#[test]
fn test_link_local_static_endpoint() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[rendezvous]
static_endpoint = "eth0:169.254.1.1"
"#,
    );
    fixture
        .validate_unpinned()
        .code(30)
        .stderr(predicate::str::contains("169.254.1.1"));
}

// ─────────────────────────────────────────────────────────────────
// Show / Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[benchmark]
iterations = 7

[cluster]
world_size = 4
"#,
    );

    collbench_cmd(&fixture.temp_dir)
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("[rendezvous]"))
        .stdout(predicate::str::contains("iterations = 7"))
        .stdout(predicate::str::contains("world_size = 4"))
        .stdout(predicate::str::contains("static_endpoint = \"test0:10.0.0.5\""));
}

#[test]
fn test_config_init_creates_file() {
    let fixture = ConfigFixture::new();
    let path = fixture.temp_dir.path().join("nested").join("config.toml");

    collbench_cmd(&fixture.temp_dir)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written to"));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[rendezvous]"));
    assert!(content.contains("tolerance_per_rank = 0.01"));

    // The generated file is valid as-is
    collbench_cmd(&fixture.temp_dir)
        .args(["config", "validate", "--config"])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[benchmark]\n");

    collbench_cmd(&fixture.temp_dir)
        .args(["config", "init", "--path", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    collbench_cmd(&fixture.temp_dir)
        .args(["config", "init", "--force", "--path", fixture.path()])
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Environment Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_benchmark() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .env("COLLBENCH_REPLAYS", "64")
        .env("COLLBENCH_AGGREGATION", "rank0")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("replays = 64"))
        .stdout(predicate::str::contains("aggregation = \"rank0\""));
}

#[test]
fn test_env_override_is_validated() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .env("COLLBENCH_WORLD_SIZE", "2")
        .env("COLLBENCH_ROOT_RANK", "3")
        .args(["config", "validate"])
        .assert()
        .code(10);
}

#[test]
fn test_config_discovered_in_home() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".collbench");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), "[benchmark]\nwarmup_launches = 5\n").unwrap();

    collbench_cmd(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("warmup_launches = 5"));
}

#[test]
fn test_tilde_expansion_in_report_path() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .env("COLLBENCH_REPORT", "~/reports/out.json")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            home.path().join("reports").join("out.json").to_str().unwrap(),
        ));
}
