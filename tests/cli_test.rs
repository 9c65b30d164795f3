//! Integration tests for dbgshell CLI commands

#![cfg(unix)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use dbgshell::config::Config;
use tempfile::{Builder, TempDir, tempdir};

fn fixture() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/fake_debugger.sh")
        .display()
        .to_string()
}

/// Config file pointing at the scripted debugger, with file logging off
fn write_config(dir: &TempDir) -> PathBuf {
    let mut config = Config::default();
    config.log.file_path = String::new();
    config.debugger.path = "/bin/sh".to_string();
    config.debugger.extra_args = vec![fixture()];
    config.debugger.symbol_path = None;
    config.debugger.line_numbers = false;
    config.debugger.echo_template = "echo {marker}".to_string();
    config.session.command_timeout_secs = 10;
    config.session.ready_timeout_secs = 5;
    config.session.grace_timeout_ms = 500;

    let path = dir.path().join("dbgshell.toml");
    config.save_to_file(&path).unwrap();
    path
}

fn dbgshell(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dbgshell"))
        .arg("--config-file")
        .arg(config)
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run dbgshell")
}

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_dbgshell"))
        .arg("--help")
        .output()
        .expect("Failed to execute help command");

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: dbgshell"), "Should show usage");
    assert!(stdout.contains("shell"), "Should show shell command");
    assert!(stdout.contains("exec"), "Should show exec command");
    assert!(stdout.contains("config"), "Should show config command");
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_dbgshell"))
        .arg("--version")
        .output()
        .expect("Failed to execute version command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_exec_prints_command_output() {
    let dir = tempdir().unwrap();
    let config = write_config(&dir);
    let dump = Builder::new().suffix(".dmp").tempfile_in(dir.path()).unwrap();
    let dump = dump.path().to_str().unwrap();

    let output = dbgshell(&config, &["exec", dump, "echo", "frames"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "frames");
}

#[test]
fn test_exec_json_output() {
    let dir = tempdir().unwrap();
    let config = write_config(&dir);
    let dump = Builder::new().suffix(".dmp").tempfile_in(dir.path()).unwrap();
    let dump = dump.path().to_str().unwrap();

    let output = dbgshell(&config, &["exec", "--json", dump, "echo", "hi"]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["output"], "hi");
    assert_eq!(json["durationExceeded"], false);
}

#[test]
fn test_exec_failures_set_exit_code() {
    let dir = tempdir().unwrap();
    let config = write_config(&dir);
    let dump = Builder::new().suffix(".dmp").tempfile_in(dir.path()).unwrap();
    let dump = dump.path().to_str().unwrap();

    let crashed = dbgshell(&config, &["exec", dump, "die"]);
    assert_eq!(crashed.status.code(), Some(1));

    let missing = dbgshell(&config, &["exec", "/no/such/crash.dmp", "k"]);
    assert_eq!(missing.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("failed to load artifact"));
}

#[test]
fn test_shell_runs_piped_commands() {
    let dir = tempdir().unwrap();
    let config = write_config(&dir);
    let dump = Builder::new().suffix(".dmp").tempfile_in(dir.path()).unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_dbgshell"))
        .arg("--config-file")
        .arg(&config)
        .arg("shell")
        .arg(dump.path())
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start shell");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"echo from-shell\n/run call_stack_verbose\n/status\n/history\n/quit\n")
        .unwrap();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("from-shell"));
    assert!(stdout.contains("State: ready"));
    assert!(stdout.contains("Commands executed: 2"));
    assert!(stdout.contains("echo from-shell"));
}

#[test]
fn test_dry_run_shows_launch_line() {
    let dir = tempdir().unwrap();
    let config = write_config(&dir);

    let output = dbgshell(&config, &["--dry-run", "exec", "crash.dmp", "k"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dry run"));
    assert!(stdout.contains("Launch: /bin/sh"));
    assert!(stdout.contains("-z"));
    assert!(stdout.contains("crash.dmp"));
}

#[test]
fn test_config_set_and_show() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("settings.toml");

    let set = dbgshell(&config, &["config", "set", "session.command_timeout_secs", "42"]);
    assert!(
        set.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&set.stderr)
    );

    let loaded = Config::load_from_file(&config).unwrap();
    assert_eq!(loaded.session.command_timeout_secs, 42);

    let show = dbgshell(&config, &["config", "show"]);
    assert!(show.status.success());
    assert!(String::from_utf8_lossy(&show.stdout).contains("command_timeout_secs = 42"));

    let bad = dbgshell(&config, &["config", "set", "session.unknown", "1"]);
    assert!(!bad.status.success());
}
