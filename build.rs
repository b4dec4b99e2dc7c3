//! Stamps the binary with where and how it was built
//!
//! `collbench version` and the JSON run report read these back through
//! `env!`, so a result file can be traced to the exact build that made it.

use std::env;
use std::process::Command;

const UNKNOWN: &str = "unknown";

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let dirty = match git(&["status", "--porcelain"]) {
        Some(status) => (!status.is_empty()).to_string(),
        None => UNKNOWN.to_string(),
    };
    let stamps = [
        ("GIT_HASH", git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(unknown)),
        ("GIT_BRANCH", git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(unknown)),
        ("GIT_DIRTY", dirty),
        (
            "BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("TARGET", env::var("TARGET").unwrap_or_else(|_| unknown())),
        ("PROFILE", env::var("PROFILE").unwrap_or_else(|_| unknown())),
        ("RUSTC_VERSION", run("rustc", &["--version"]).unwrap_or_else(unknown)),
    ];

    for (key, value) in &stamps {
        println!("cargo:rustc-env=COLLBENCH_{}={}", key, value);
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn git(args: &[&str]) -> Option<String> {
    run("git", args)
}

/// Trimmed stdout of a successful command
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
