// Integration tests for the ax25 CLI
// Run with: cargo test --test cli_commands_test

use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary with an isolated configuration.
fn ax25(config_dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ax25"))
        .args(args)
        .env("PATTY_CONFIG", config_dir.path().join("config.json"))
        .env_remove("PATTY_SOCKET")
        .env("PATTY_LOG", "off")
        .output()
        .expect("Failed to execute ax25")
}

/// Test the parse command prints canonical form and record
#[test]
fn test_parse_command() {
    let temp_dir = TempDir::new().unwrap();
    let output = ax25(&temp_dir, &["parse", "n0call-6"]);

    assert!(output.status.success(), "Command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "N0CALL-6\n9c 60 86 82 98 98 0c\n");
}

/// Test the parse command rejects an out-of-range SSID
#[test]
fn test_parse_invalid_address() {
    let temp_dir = TempDir::new().unwrap();
    let output = ax25(&temp_dir, &["parse", "N0CALL-16"]);

    assert!(!output.status.success(), "Command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("N0CALL-16"), "Should name the bad address: {stderr}");
}

/// Test dial reports an unreachable daemon given by --socket
#[test]
fn test_dial_without_daemon_fails() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("missing.sock");
    let output = ax25(
        &temp_dir,
        &["--socket", socket.to_str().unwrap(), "dial", "K3XEC-10"],
    );

    assert!(!output.status.success(), "Command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.sock"), "Should name the socket: {stderr}");
}

/// Test the socket path is read from the config file
#[test]
fn test_listen_uses_config_file_socket() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("config.json"),
        r#"{"socket_path": "/nonexistent/from-config.sock"}"#,
    )
    .unwrap();

    let output = ax25(&temp_dir, &["listen", "N0CALL", "--once"]);

    assert!(!output.status.success(), "Command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("from-config.sock"), "Should use config path: {stderr}");
}

/// Test PATTY_SOCKET overrides the config file
#[test]
fn test_env_socket_overrides_config() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("config.json"),
        r#"{"socket_path": "/nonexistent/from-config.sock"}"#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ax25"))
        .args(["dial", "K3XEC"])
        .env("PATTY_CONFIG", temp_dir.path().join("config.json"))
        .env("PATTY_SOCKET", "/nonexistent/from-env.sock")
        .env("PATTY_LOG", "off")
        .output()
        .expect("Failed to execute ax25");

    assert!(!output.status.success(), "Command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("from-env.sock"), "Should use env path: {stderr}");
}

/// Test a malformed config file is reported
#[test]
fn test_malformed_config_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("config.json"), "not json").unwrap();

    let output = ax25(&temp_dir, &["dial", "K3XEC"]);

    assert!(!output.status.success(), "Command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration"), "Should mention config: {stderr}");
}
