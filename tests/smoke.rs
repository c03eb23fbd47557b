//! Smoke tests -- verify the binary runs and the subcommands are wired up.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(db: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("metricwatch").unwrap();
    cmd.env_remove("METRICWATCH_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--db")
        .arg(db.path().join("smoke.db"));
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("metricwatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Anomaly detection and alerting"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("metricwatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("metricwatch"));
}

#[test]
fn test_subcommands_exist() {
    for args in [
        vec!["serve", "--help"],
        vec!["record", "--help"],
        vec!["detect", "--help"],
        vec!["alerts", "list", "--help"],
        vec!["alerts", "ack", "--help"],
        vec!["alerts", "resolve", "--help"],
        vec!["summary", "--help"],
    ] {
        Command::cargo_bin("metricwatch")
            .unwrap()
            .args(&args)
            .assert()
            .success();
    }
}

#[test]
fn test_detect_requires_a_target() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).arg("detect").assert().failure();
}

#[test]
fn test_record_then_detect_reports_insufficient_data() {
    let dir = TempDir::new().unwrap();
    let today = chrono::Utc::now().date_naive();

    cmd(&dir)
        .args(["record", "--metric", "sales_total", "--amount", "1200.5", "--date"])
        .arg(today.to_string())
        .assert()
        .success()
        .stdout(predicates::str::contains("Recorded sales_total"));

    cmd(&dir)
        .args(["detect", "--metric", "sales_total", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("insufficient data"));
}

#[test]
fn test_empty_store_lists_and_summarizes() {
    let dir = TempDir::new().unwrap();

    cmd(&dir)
        .args(["alerts", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No alerts found."));

    cmd(&dir)
        .args(["summary", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"total_count\": 0"));
}

#[test]
fn test_ack_unknown_alert_fails() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .args(["alerts", "ack", "7c1f8f3e-2f5b-4c1e-9a55-0d2a3b4c5d6e"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Alert not found"));
}

#[test]
fn test_invalid_status_filter_is_rejected() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .args(["alerts", "list", "--status", "closed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("closed"));
}

#[test]
fn test_day_windows_reject_negatives_and_accept_huge_values() {
    let dir = TempDir::new().unwrap();

    cmd(&dir)
        .args(["alerts", "list", "--since-days=-1"])
        .assert()
        .failure();

    cmd(&dir)
        .args(["alerts", "list", "--since-days", "1000000000"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No alerts found."));

    cmd(&dir)
        .args(["summary", "--json", "--recent-days", "9223372036854775807"])
        .assert()
        .success();

    cmd(&dir)
        .args(["detect", "--metric", "sales_total", "--lookback-days", "4294967295"])
        .assert()
        .success()
        .stdout(predicates::str::contains("insufficient data"));
}
