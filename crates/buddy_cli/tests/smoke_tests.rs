//! CLI smoke tests: verify basic binary behavior.

use std::process::Command;

fn cli_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_buddycare"))
}

#[test]
fn test_help_flag() {
    let output = cli_bin().arg("--help").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Expected usage info in --help output");
    for sub in ["serve", "chat", "summarize", "claim"] {
        assert!(stdout.contains(sub), "Expected subcommand {} in --help output", sub);
    }
}

#[test]
fn test_version_flag() {
    let output = cli_bin().arg("--version").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("buddy_cli"), "Expected crate name in --version output");
}

#[test]
fn test_subcommand_help() {
    let output = cli_bin()
        .args(["claim", "--help"])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CAREGIVER"));
}

#[test]
fn test_missing_subcommand_fails() {
    let output = cli_bin().output().expect("failed to run");
    assert!(!output.status.success());
}

#[test]
fn test_claim_on_fresh_database_is_a_noop() {
    let dir = std::env::temp_dir().join(format!("buddycare-smoke-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let db = dir.join("smoke.db");

    let output = cli_bin()
        .arg("--config")
        .arg(dir.join("missing.toml"))
        .arg("--db")
        .arg(&db)
        .args(["claim", "carer"])
        .env("LLM_PROVIDER", "mock")
        .output()
        .expect("failed to run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not yet entitled"));

    let _ = std::fs::remove_dir_all(&dir);
}
