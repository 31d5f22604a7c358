//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A CLI command that never picks up the user's own config file
fn cli_cmd(dir: &TempDir) -> Command {
    let config = dir.path().join("config.json");
    if !config.exists() {
        std::fs::write(&config, "{}").expect("Failed to write config");
    }
    let mut cmd = Command::cargo_bin("wearsync").expect("Failed to find wearsync binary");
    cmd.arg("--config").arg(&config);
    cmd.env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Help
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("phone"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("demo"));
}

#[test]
fn test_watch_requires_pairing_code() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("watch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--pair"));
}

#[test]
fn test_watch_rejects_bad_pairing_code() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .args(["watch", "--pair", "not-a-code"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid pairing code"));
}

// ============================================================================
// Demo Command Tests
// ============================================================================

#[test]
fn test_demo_prints_decoded_update() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .args(["demo", "--high", "24", "--low", "14", "--condition", "800"])
        .assert()
        .success()
        .stdout(predicate::str::contains("High: 24°"))
        .stdout(predicate::str::contains("Low: 14°"))
        .stdout(predicate::str::contains("Icon: 22x22 PNG"));
}

#[test]
fn test_demo_imperial_message_variant() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .args([
            "demo", "--high", "23.9", "--low", "14.4", "--unit", "imperial", "--variant", "message",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("High: 75°"))
        .stdout(predicate::str::contains("Low: 58°"));
}

#[test]
fn test_demo_unknown_condition_has_no_icon() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .args(["demo", "--high", "-2", "--low", "-9", "--condition", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("High: -2°"))
        .stdout(predicate::str::contains("Icon: none"));
}

#[test]
fn test_demo_writes_icon_file() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("icon.png");

    cli_cmd(&dir)
        .args(["demo", "--high", "20", "--low", "10", "--icon-out"])
        .arg(&out)
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[test]
fn test_config_icon_size_is_honoured() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{ "icon_size": 40 }"#).unwrap();

    cli_cmd(&dir)
        .args(["demo", "--high", "20", "--low", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Icon: 40x40 PNG"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{ "pool_size": 0 }"#).unwrap();

    cli_cmd(&dir)
        .args(["demo", "--high", "20", "--low", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pool_size"));
}

// ============================================================================
// Logging
// ============================================================================

#[test]
fn test_demo_writes_jsonl_and_logs_reads_it() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");

    cli_cmd(&dir)
        .arg("-v")
        .arg("--log-dir")
        .arg(&logs)
        .args(["demo", "--high", "20", "--low", "10"])
        .assert()
        .success();

    let raw: Vec<_> = std::fs::read_dir(logs.join("raw")).unwrap().collect();
    assert_eq!(raw.len(), 1);

    cli_cmd(&dir)
        .arg("--log-dir")
        .arg(&logs)
        .args(["logs", "--device", "demo", "--level", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[demo]"))
        .stdout(predicate::str::contains("Weather updated"));
}
