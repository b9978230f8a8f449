// crates/ob-conformance-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests running the `ob-conformance` binary.
// Dependencies: ob-conformance-cli binary
// ============================================================================
//! ## Overview
//! Runs the inspection commands on suite files and checks that a run fails
//! before any network traffic when its configuration cannot be loaded.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn cli_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ob-conformance"))
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(cli_bin()).args(args).output().expect("run ob-conformance")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn write_suite(dir: &Path) -> PathBuf {
    let path = dir.join("accounts.yaml");
    let suite = r#"
id: accounts
name: Accounts
specification: account-transaction-v3.1
testCases:
  - id: get-accounts
    name: Get accounts
    input:
      method: GET
      endpoint: /accounts
  - id: get-balances
    name: Get balances
    input:
      method: GET
      endpoint: /accounts/$AccountId/balances
"#;
    fs::write(&path, suite.trim_start()).expect("write suite");
    path
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn specs_lists_known_identifiers() {
    let output = run_cli(&["specs"]);
    assert!(output.status.success());
    let specs = stdout_json(&output);
    let identifiers: Vec<&str> =
        specs.as_array().unwrap().iter().filter_map(|spec| spec["identifier"].as_str()).collect();
    assert!(identifiers.contains(&"account-transaction-v3.1"));
    assert!(identifiers.contains(&"payment-initiation-v3.1.4"));
}

#[test]
fn permissions_prints_token_plan() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = run_cli(&["permissions", suite.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let plan = stdout_json(&output);
    assert_eq!(plan[0]["tokenName"], "account_token_001");
    assert_eq!(plan[0]["permissions"], serde_json::json!(["ReadAccountsBasic", "ReadBalances"]));
    assert_eq!(
        plan[0]["tests"],
        serde_json::json!(["accounts/get-accounts", "accounts/get-balances"])
    );
}

#[test]
fn conditionality_reports_missing_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = run_cli(&["conditionality", suite.to_str().unwrap()]);
    assert!(!output.status.success());
    let report = stdout_json(&output);
    let missing = report[0]["missing"].as_array().unwrap();
    assert!(missing.iter().any(|entry| entry == "POST /account-access-consents"));
    assert!(!missing.iter().any(|entry| entry == "GET /accounts/{AccountId}/balances"));
}

#[test]
fn conditionality_rejects_unknown_specification() {
    let output = run_cli(&["conditionality", "--spec", "account-transaction-v9.9"]);
    assert!(!output.status.success());
    assert!(!String::from_utf8_lossy(&output.stderr).is_empty());
}

#[test]
fn run_fails_without_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let config = dir.path().join("missing");
    let output = run_cli(&["run", "--config", config.to_str().unwrap(), suite.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"), "{stderr}");
}
