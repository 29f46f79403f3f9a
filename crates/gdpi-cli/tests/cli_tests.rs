//! End-to-end tests for the goodbyedpi binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn goodbyedpi(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("goodbyedpi").unwrap();
    cmd.current_dir(dir).env("NO_COLOR", "1").env_remove("GOODBYEDPI_CONFIG");
    cmd
}

// ===== Config Tests =====

#[test]
fn test_generate_then_validate() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args(["config", "generate", "--output", "generated.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file generated"));

    goodbyedpi(dir.path())
        .args(["config", "validate", "generated.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Min confidence: 70"));

    // A second generate refuses to overwrite
    goodbyedpi(dir.path())
        .args(["config", "generate", "--output", "generated.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_validate_rejects_bad_values() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("bad.toml"), "[apply]\ntimeout_secs = 0\n").unwrap();

    goodbyedpi(dir.path())
        .args(["config", "validate", "bad.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation failed"));
}

#[test]
fn test_show_reads_config_from_working_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("goodbyedpi.toml"), "[auto_apply]\nmin_confidence = 85\n").unwrap();

    goodbyedpi(dir.path())
        .args(["config", "show", "--no-persist"])
        .assert()
        .success()
        .stdout(predicate::str::contains("min_confidence = 85"));
}

// ===== Apply Tests =====

#[test]
fn test_apply_strategies() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args([
            "apply",
            "--strategy",
            "TlsFragment,DropRst",
            "--target",
            "example.com",
            "--no-verify",
            "--no-persist",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("APPLIED"))
        .stdout(predicate::str::contains("Applied to example.com"));
}

#[test]
fn test_apply_plan_file_as_json() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("plan.json"),
        r#"{"for_diagnosis": "SNI filtering", "plan_confidence": 80, "strategies": [{"id": "TlsDisorder"}], "drop_udp443": true}"#,
    )
    .unwrap();

    goodbyedpi(dir.path())
        .args([
            "apply",
            "--plan",
            "plan.json",
            "--target",
            "Example.COM.",
            "--json",
            "--no-verify",
            "--no-persist",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status": "applied""#))
        .stdout(predicate::str::contains(r#""host_key": "example.com""#))
        .stdout(predicate::str::contains("TLS_DISORDER + DROP_UDP_443"));
}

#[test]
fn test_apply_engine_failure_rolls_back() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args([
            "apply",
            "--strategy",
            "TlsFragment",
            "--target",
            "example.com",
            "--fail-engine",
            "--no-verify",
            "--no-persist",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("ROLLED_BACK"))
        .stderr(predicate::str::contains("rolled back"));
}

#[test]
fn test_apply_requires_a_plan() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args(["apply", "--target", "example.com", "--no-persist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--plan or --strategy"));
}

#[test]
fn test_apply_persists_settings() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");

    goodbyedpi(dir.path())
        .args(["apply", "--strategy", "AggressiveFragment", "--target", "example.com", "--no-verify"])
        .arg("--state-dir")
        .arg(&state)
        .assert()
        .success();

    let saved = std::fs::read_to_string(state.join("settings.json")).unwrap();
    assert!(saved.contains("last_preset"));
}

#[test]
fn test_apply_literal_target_queues_retest() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args(["apply", "--strategy", "TlsFragment", "--target", "203.0.113.9", "--no-persist"])
        .assert()
        .success()
        .stdout(predicate::str::contains("retest 203.0.113.9:443:TCP"));
}

// ===== Replay Tests =====

#[test]
fn test_replay_throttles_repeated_target() {
    let dir = TempDir::new().unwrap();
    let events = [
        r#"{"host": "a.example.com", "plan": {"plan_confidence": 90, "strategies": [{"id": "TlsFragment"}]}}"#,
        r#"{"host": "b.example.com", "plan": {"plan_confidence": 90, "strategies": [{"id": "TlsDisorder"}]}}"#,
        r#"{"host": "rr1.sn-abc.1e100.net", "plan": {"plan_confidence": 90, "strategies": [{"id": "TlsFragment"}]}}"#,
        r#"{"host": "c.example.org", "plan": {"plan_confidence": 10, "strategies": [{"id": "TlsFragment"}]}}"#,
    ];
    std::fs::write(dir.path().join("events.jsonl"), events.join("\n")).unwrap();

    goodbyedpi(dir.path())
        .args(["replay", "events.jsonl", "--no-verify", "--no-persist"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatch example.com"))
        // Either the running apply or the min interval holds the second one back
        .stdout(predicate::str::contains("skip b.example.com:"))
        .stdout(predicate::str::contains("skip rr1.sn-abc.1e100.net: noise host"))
        .stdout(predicate::str::contains("skip c.example.org: policy: confidence<70"))
        .stdout(predicate::str::contains("dispatched: 1, skipped: 3"));
}

#[test]
fn test_replay_rejects_malformed_line() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("events.jsonl"), "{\"wait_ms\": 1}\nnot json\n").unwrap();

    goodbyedpi(dir.path())
        .args(["replay", "events.jsonl", "--no-persist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid event on line 2"));
}

// ===== Completions Tests =====

#[test]
fn test_completions_bash() {
    let dir = TempDir::new().unwrap();

    goodbyedpi(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("goodbyedpi"));
}
