//! Command line behavior of the preflight launcher.
//!
//! Runs the binary against a temporary config directory. A failed preflight
//! must exit with status 1 before any report or log directory is created.

use std::path::Path;
use std::process::{Command, Output};

fn screener(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_twstock-screener"))
        .arg("--config-dir")
        .arg(config_dir)
        .args(args)
        .env_remove("FINMIND_TOKEN")
        .env_remove("FINMIND_API_TOKEN")
        .env_remove("TWSTOCK_REPORTS_DIR")
        .output()
        .expect("failed to launch twstock-screener")
}

#[test]
fn test_run_without_token_exits_1() {
    let tmp = tempfile::tempdir().unwrap();
    let out = screener(tmp.path(), &["run", "--test-mode"]);

    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("FinMind API Token"), "stderr: {}", stderr);
    assert!(!tmp.path().join("reports").exists());
    assert!(!tmp.path().join("logs").exists());
}

#[test]
fn test_default_command_is_run() {
    let tmp = tempfile::tempdir().unwrap();
    let out = screener(tmp.path(), &[]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("FinMind API Token"));
}

#[test]
fn test_init_config_then_placeholder_token_still_fails() {
    let tmp = tempfile::tempdir().unwrap();

    let out = screener(tmp.path(), &["init-config"]);
    assert!(out.status.success());
    assert!(tmp.path().join("config.json").is_file());
    assert!(tmp.path().join("api_config.json").is_file());

    // The template token is a placeholder.
    let out = screener(tmp.path(), &["check"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!tmp.path().join("reports").exists());
}

#[test]
fn test_invalid_config_file_exits_1() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("config.json"), "{ not json").unwrap();

    let out = screener(tmp.path(), &["run"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("錯誤"));
}

#[test]
fn test_pause_waits_for_enter_on_failure() {
    let tmp = tempfile::tempdir().unwrap();
    // stdin is closed by `output()`, so the pause returns at end of input.
    let out = screener(tmp.path(), &["run", "--pause"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("請按 Enter 鍵繼續"));
}
