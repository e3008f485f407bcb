#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const REPORT: &str = r#"{
    "hostname": "laptop-1",
    "team_id": 3,
    "operating_system": {"name": "macOS", "version": "14.5", "arch": "arm64"},
    "software": [
        {"name": "Firefox", "version": "128.0", "source": "apps", "bundle_identifier": "org.mozilla.firefox"},
        {"name": "Figma", "version": "116.1", "source": "apps"}
    ],
    "certificates": [
        {
            "sha1_sum": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "not_valid_before": "2024-01-01T00:00:00Z",
            "not_valid_after": "2034-01-01T00:00:00Z",
            "common_name": "Example Root"
        }
    ]
}"#;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config_path = dir.join("canon.toml");
    let db_path = dir.join("data").join("canon.db");
    fs::write(
        &config_path,
        format!(
            "[metadata]\ntype = \"sqlite\"\npath = \"{}\"\n\n[reconcile]\nretry_base_delay_ms = 1\nretry_max_delay_ms = 10\n",
            db_path.display()
        ),
    )
    .unwrap();
    config_path
}

fn canonctl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("canonctl").unwrap();
    cmd.env_remove("CANON_CONFIG")
        .env("RUST_LOG", "error")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn ingest_then_list_titles_and_certificates() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let report_path = temp.path().join("report.json");
    fs::write(&report_path, REPORT).unwrap();

    let output = canonctl(&config)
        .arg("ingest")
        .arg("--host-id")
        .arg("1")
        .arg("--file")
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "ingest failed: {output:?}");
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["host_id"], 1);
    assert_eq!(summary["software"]["inserted"].as_array().unwrap().len(), 2);
    assert_eq!(summary["certificates"]["inserted"], 1);

    canonctl(&config)
        .arg("sync-counts")
        .assert()
        .success()
        .stdout(contains("\"titles\""));

    let output = canonctl(&config)
        .arg("titles")
        .arg("--team-id")
        .arg("3")
        .output()
        .unwrap();
    assert!(output.status.success(), "titles failed: {output:?}");
    let page: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["has_next_results"], false);

    canonctl(&config)
        .arg("certs")
        .arg("--host-id")
        .arg("1")
        .assert()
        .success()
        .stdout(contains("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))
        .stdout(contains("Example Root"));
}

#[test]
fn reingesting_the_same_report_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let report_path = temp.path().join("report.json");
    fs::write(&report_path, REPORT).unwrap();

    for _ in 0..2 {
        canonctl(&config)
            .arg("ingest")
            .arg("--host-id")
            .arg("1")
            .arg("--file")
            .arg(&report_path)
            .assert()
            .success();
    }

    let output = canonctl(&config)
        .arg("ingest")
        .arg("--host-id")
        .arg("1")
        .arg("--file")
        .arg(&report_path)
        .output()
        .unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(summary["software"]["inserted"].as_array().unwrap().is_empty());
    assert_eq!(summary["certificates"]["inserted"], 0);
    assert_eq!(summary["certificates"]["unchanged"], 1);
}

#[test]
fn ingest_from_stdin() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    canonctl(&config)
        .arg("ingest")
        .arg("--host-id")
        .arg("2")
        .arg("--file")
        .arg("-")
        .write_stdin(r#"{"software": [{"name": "curl", "version": "8.8", "source": "deb_packages"}]}"#)
        .assert()
        .success()
        .stdout(contains("\"host_id\": 2"));
}

#[test]
fn unknown_order_key_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    canonctl(&config)
        .arg("vulns")
        .arg("--order-key")
        .arg("severity")
        .assert()
        .failure()
        .stderr(contains("unsupported order_key"));
}

#[test]
fn malformed_report_fails_with_context() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let report_path = temp.path().join("broken.json");
    fs::write(&report_path, "{not json").unwrap();

    canonctl(&config)
        .arg("ingest")
        .arg("--host-id")
        .arg("1")
        .arg("--file")
        .arg(&report_path)
        .assert()
        .failure()
        .stderr(contains("failed to parse host report"));
}
