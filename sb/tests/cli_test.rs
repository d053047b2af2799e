//! CLI tests for the sb binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_changelog(path: &Path) {
    let lines = [
        r#"{"source":"orders","partition":0,"offset":0,"key":"a","value":"1"}"#,
        r#"{"source":"orders","partition":0,"offset":1,"key":"b","value":"2"}"#,
        r#"{"source":"orders","partition":0,"offset":2,"key":"a","value":null}"#,
        r#"{"source":"orders","partition":0,"offset":3,"key":"c","value":"3"}"#,
        r#"{"source":"orders","partition":0,"offset":4,"key":"d","value":"4"}"#,
        r#"{"source":"orders","partition":1,"offset":0,"key":"x","value":"9"}"#,
    ];
    fs::write(path, lines.join("\n")).unwrap();
}

fn sb(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sb").unwrap();
    cmd.arg("--state-dir")
        .arg(state_dir)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_replay_respects_ceiling_and_checkpoints() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join("state");
    let changelog = temp.path().join("changelog.jsonl");
    write_changelog(&changelog);

    sb(&state_dir)
        .args(["replay", "0_0", "--changelog"])
        .arg(&changelog)
        .args(["--ceiling", "orders-0=3", "--ceiling", "orders-1=1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed task"))
        .stdout(predicate::str::contains("orders-0 2"))
        .stdout(predicate::str::contains("orders-1 0"));

    sb(&state_dir)
        .args(["checkpoint", "0_0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("orders-0 2"));

    sb(&state_dir)
        .args(["dump", "0_0", "orders-0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("b = 2"))
        .stdout(predicate::str::contains("a = ").not())
        .stdout(predicate::str::contains("c = ").not());
}

#[test]
fn test_replay_again_resumes_past_checkpoint() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join("state");
    let changelog = temp.path().join("changelog.jsonl");
    write_changelog(&changelog);

    sb(&state_dir)
        .args(["replay", "0_0", "--changelog"])
        .arg(&changelog)
        .args(["--ceiling", "orders-0=3"])
        .assert()
        .success();

    sb(&state_dir)
        .args(["replay", "0_0", "--changelog"])
        .arg(&changelog)
        .args(["--ceiling", "orders-0=5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("orders-0 4"));

    sb(&state_dir)
        .args(["dump", "0_0", "orders-0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("c = 3"))
        .stdout(predicate::str::contains("d = 4"));
}

#[test]
fn test_replay_without_ceiling_applies_nothing() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join("state");
    let changelog = temp.path().join("changelog.jsonl");
    write_changelog(&changelog);

    sb(&state_dir)
        .args(["replay", "0_0", "--changelog"])
        .arg(&changelog)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 consumed, 6 held at ceiling"))
        .stdout(predicate::str::contains("No checkpoint"));
}

#[test]
fn test_dump_rejects_partition_outside_task_dir() {
    let temp = TempDir::new().unwrap();

    sb(temp.path())
        .args(["dump", "0_0", "../escaped-0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid partition"));
}

#[test]
fn test_checkpoint_for_unknown_task() {
    let temp = TempDir::new().unwrap();

    sb(temp.path())
        .args(["checkpoint", "7_7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoint"));
}

#[test]
fn test_rejects_malformed_task_id() {
    let temp = TempDir::new().unwrap();

    sb(temp.path())
        .args(["checkpoint", "seven"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid task id"));
}
