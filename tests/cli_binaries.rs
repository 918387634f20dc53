//! Smoke-tests the built binaries directly (spec.md §6), the way a
//! packaging test would invoke them.

use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn nconftool_help_lists_usage() {
    let mut cmd = Command::cargo_bin("nconftool").unwrap();
    cmd.arg("--help");
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Usage:"));
}

#[test]
fn nconftool_without_operands_is_an_error() {
    let mut cmd = Command::cargo_bin("nconftool").unwrap();
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn nconftool_ping_without_daemon_is_boolean_false() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("socket");
    let mut cmd = Command::cargo_bin("nconftool").unwrap();
    cmd.arg("--socket").arg(&socket).arg("--ping");
    let status = cmd.status().unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn nconftool_set_then_get_direct() {
    let dir = tempfile::tempdir().unwrap();
    let source = format!("file:readwrite:{}", dir.path().join("config").display());

    let mut set_cmd = Command::cargo_bin("nconftool").unwrap();
    set_cmd
        .args(["--direct", "--source", &source, "--set", "--type", "int", "/t/answer", "42"]);
    assert!(set_cmd.status().unwrap().success());

    let mut get_cmd = Command::cargo_bin("nconftool").unwrap();
    get_cmd.args(["--direct", "--source", &source, "--get", "/t/answer"]);
    let output = get_cmd.output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout).unwrap().contains("42"));
}
