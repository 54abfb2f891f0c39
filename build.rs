//! Build script to inject version and git SHA at compile time.
//!
//! Environment variables (set by CI or fall back to defaults):
//! - PUB_VERSION: Version string (defaults to CARGO_PKG_VERSION)
//! - PUB_GIT_SHA: Git commit SHA (defaults to "unknown" or git rev-parse)

use std::process::Command;

fn main() {
    let version = std::env::var("PUB_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=PUB_VERSION={}", version);

    // PUB_GIT_SHA, then GITHUB_SHA, then the local checkout
    let git_sha = std::env::var("PUB_GIT_SHA")
        .or_else(|_| std::env::var("GITHUB_SHA").map(|s| s.chars().take(7).collect()))
        .unwrap_or_else(|_| local_git_sha());
    println!("cargo:rustc-env=PUB_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=PUB_VERSION");
    println!("cargo:rerun-if-env-changed=PUB_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn local_git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
