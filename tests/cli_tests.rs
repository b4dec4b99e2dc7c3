//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use common::{collbench_cmd, plan_fixture, valid_config_fixture};
use predicates::prelude::*;
use tempfile::TempDir;

/// `collbench run` on the shipped plan fixture with small, fast settings
fn run_cmd(home: &TempDir, plan_name: &str) -> assert_cmd::Command {
    let mut cmd = collbench_cmd(home);
    cmd.arg("run")
        .arg("--execution_plan_name")
        .arg(plan_name)
        .arg("--execution_plan_path")
        .arg(plan_fixture())
        .args(["--iterations", "2", "--replays", "2"]);
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("collective"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("endpoint"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("collbench"))
        .stdout(predicate::str::contains("Profile:"))
        .stdout(predicate::str::contains("allreduce, allgather"));
}

#[test]
fn test_run_help_lists_plan_flags() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--execution_plan_name"))
        .stdout(predicate::str::contains("--execution_plan_path"))
        .stdout(predicate::str::contains("--in_place"))
        .stdout(predicate::str::contains("--packet_type"));
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_allreduce_prints_every_rank() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce_ll16")
        .args(["--size", "4K", "--dtype", "float32", "--world_size", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rank: 0 Execution time:"))
        .stdout(predicate::str::contains("Rank: 1 Execution time:"))
        .stdout(predicate::str::contains(
            "data size: 4096 bytes data type: float32 packet type: LL16",
        ))
        .stdout(predicate::str::contains("busbw"));
}

#[test]
fn test_run_allgather_in_place_sweep() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allgather_ll8")
        .args(["--in_place", "--packet_type", "LL8", "--dtype", "int32"])
        .args(["--size", "1K", "--max_size", "4K", "--world_size", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allgather_ll8 (allgather) on 3 ranks"))
        .stdout(predicate::str::contains("data size: 1024 bytes"))
        .stdout(predicate::str::contains("data size: 2048 bytes"))
        .stdout(predicate::str::contains("data size: 4096 bytes"));
}

#[test]
fn test_run_writes_json_report() {
    let home = TempDir::new().unwrap();
    let report = home.path().join("reports").join("run.json");

    run_cmd(&home, "allreduce")
        .args(["--size", "1K", "--world_size", "2", "--aggregation", "min"])
        .arg("--output")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Report written to"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["world_size"], 2);
    assert_eq!(json["engine"], "loopback");
    let cases = json["cases"].as_array().unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0]["aggregation"], "min");
    assert_eq!(cases[0]["dtype"], "float16");
}

#[test]
fn test_run_with_config_file() {
    let home = TempDir::new().unwrap();
    let mut cmd = collbench_cmd(&home);
    cmd.env_remove("COLLBENCH_STATIC_ENDPOINT")
        .arg("run")
        .arg("--config")
        .arg(valid_config_fixture())
        .args(["-n", "allreduce", "-p"])
        .arg(plan_fixture())
        .args(["--size", "512"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aggregation max"));
}

#[test]
fn test_run_invalid_size_is_config_error() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .args(["--size", "12Q"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Invalid size"));
}

#[test]
fn test_run_unknown_dtype_is_config_error() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .args(["--size", "1K", "--dtype", "bfloat16"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Unknown data type"));
}

#[test]
fn test_run_missing_plan_file() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .args(["run", "-n", "allreduce", "-p", "/nonexistent/plan.json", "--size", "1K"])
        .assert()
        .code(20)
        .stderr(predicate::str::contains("/nonexistent/plan.json"));
}

#[test]
fn test_run_rejects_loopback_static_endpoint() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .env("COLLBENCH_STATIC_ENDPOINT", "lo:127.0.0.1")
        .args(["--size", "1K"])
        .assert()
        .code(30)
        .stderr(predicate::str::contains("Invalid endpoint"));
}

#[test]
fn test_run_with_invalid_config() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .args(["--size", "1K"])
        .assert()
        .code(10);
}

#[test]
fn test_run_without_size_is_usage_error() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--size"));
}

#[test]
fn test_run_unaddressable_size_is_config_error() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .args(["--size", "8000000000G", "--world_size", "3"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Invalid size"))
        .stdout(predicate::str::contains("Execution time").not());
}

// ─────────────────────────────────────────────────────────────────
// Endpoint Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_endpoint_static() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .arg("endpoint")
        .assert()
        .success()
        .stdout(predicate::str::diff("test0:10.0.0.5\n"));
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home).args(["-vv", "version"]).assert().success();
}

#[test]
fn test_quiet_run_keeps_results_on_stdout() {
    let home = TempDir::new().unwrap();
    run_cmd(&home, "allreduce")
        .args(["--quiet", "--size", "256", "--world_size", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rank: 0 Execution time:"))
        .stderr(predicate::str::is_empty());
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home)
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    let home = TempDir::new().unwrap();
    collbench_cmd(&home).assert().failure();
}
