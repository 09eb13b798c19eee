//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They only exercise commands that need no reachable peer.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pubnode").expect("Failed to find pubnode binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Initialize a node in `data_dir`
fn init_node(data_dir: &TempDir) {
    cli_cmd(data_dir)
        .args(["init", "--url", "https://cli.test", "--title", "CLI Node"])
        .assert()
        .success();
}

/// Extract the publication id from `post` output (first field of the listing line)
fn extract_publication_id(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.starts_with("  ") && line.contains("0x"))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
}

// ============================================================================
// Init & Info
// ============================================================================

#[test]
fn test_init_creates_node() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["init", "--url", "https://cli.test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized node"))
        .stdout(predicate::str::contains("Address: 0x"));

    assert!(data_dir.path().join("pubnode.toml").exists());
    assert!(data_dir.path().join("pubnode.redb").exists());
}

#[test]
fn test_init_twice_fails() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["init", "--url", "https://cli.test"])
        .assert()
        .failure();
}

#[test]
fn test_init_rejects_bad_url() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["init", "--url", "not a url"])
        .assert()
        .failure();
}

#[test]
fn test_info_requires_init() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("run init first"));
}

#[test]
fn test_info_command() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("pubnode v"))
        .stdout(predicate::str::contains("URL: https://cli.test"))
        .stdout(predicate::str::contains("Title: CLI Node"))
        .stdout(predicate::str::contains("Publications: 0"));
}

// ============================================================================
// Publishing
// ============================================================================

#[test]
fn test_post_and_list() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["post", "# Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Published"))
        .stdout(predicate::str::contains("[signed]"));

    cli_cmd(&data_dir)
        .args(["publications", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Publications (1)"));
}

#[test]
fn test_post_file_requires_description() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);
    let file = data_dir.path().join("note.txt");
    std::fs::write(&file, "file body").unwrap();

    cli_cmd(&data_dir)
        .args(["post", "--file"])
        .arg(&file)
        .assert()
        .failure();

    cli_cmd(&data_dir)
        .args(["post", "--description", "a note", "--file"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("a note"));
}

#[test]
fn test_draft_sign_and_delete() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    let output = cli_cmd(&data_dir)
        .args(["post", "--draft", "draft body"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[draft]"));
    let id = extract_publication_id(&stdout).expect("publication id in output");

    cli_cmd(&data_dir)
        .args(["publications", "document", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("createdAtTimestamp"));

    cli_cmd(&data_dir)
        .args(["publications", "sign", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("[signed]"));

    // Signing twice is rejected
    cli_cmd(&data_dir)
        .args(["publications", "sign", &id])
        .assert()
        .failure();

    cli_cmd(&data_dir)
        .args(["publications", "delete", &id])
        .assert()
        .success();

    cli_cmd(&data_dir)
        .args(["publications", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No publications."));
}

#[test]
fn test_cleanup_reports() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .arg("cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted: 0"));
}

// ============================================================================
// Sync & Connections
// ============================================================================

#[test]
fn test_sync_status_without_followees() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["sync", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not following any nodes."));
}

#[test]
fn test_sync_run_with_no_peers() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["sync", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Peers: 0"));
}

#[test]
fn test_unfollow_unknown_address_fails() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["unfollow", "not-an-address"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid address"));
}

#[test]
fn test_connections_empty() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .arg("connections")
        .assert()
        .success()
        .stdout(predicate::str::contains("Followers (0)"))
        .stdout(predicate::str::contains("Following (0)"));
}

#[test]
fn test_profile_set_without_followers() {
    let data_dir = TempDir::new().unwrap();
    init_node(&data_dir);

    cli_cmd(&data_dir)
        .args(["profile", "set", "--title", "Renamed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("version 2"));

    cli_cmd(&data_dir)
        .args(["profile", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Title: Renamed"));
}
