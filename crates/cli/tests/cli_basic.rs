//! Binary-level smoke tests for the `capa` CLI.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("capa")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("rules"));
}

#[test]
fn rules_prints_the_transition_table() {
    Command::cargo_bin("capa")
        .unwrap()
        .arg("rules")
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"))
        .stdout(predicate::str::contains("in_progress"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn rules_json_output_is_parseable() {
    let output = Command::cargo_bin("capa")
        .unwrap()
        .args(["rules", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rules = value["rules"].as_array().unwrap();
    assert!(rules.len() >= 4);
    assert!(rules
        .iter()
        .any(|r| r["event"] == "verify" && r["from"] == "completed" && r["to"] == "verified"));
}

#[test]
fn unknown_subcommand_fails() {
    Command::cargo_bin("capa")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
