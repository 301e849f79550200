#![cfg(unix)]

use std::{
    path::Path,
    process::{Child, Stdio},
    time::{Duration, Instant},
};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `csd` with an isolated home and config directory.
fn csd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("csd").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        std::thread::sleep(Duration::from_millis(50));
    }
}

struct Server(Child);

impl Server {
    fn spawn(home: &Path) -> Self {
        let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("csd"))
            .args(["server", "start"])
            .env("HOME", home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        wait_for(&home.join(".csd").join("csd.socket"));
        Self(child)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ssh").and(predicate::str::contains("local")));
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_server_socket_path() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .args(["server", "socket"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with(".csd/csd.socket\n"));
}

#[test]
fn test_local_without_daemon() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .args(["local", "gh", "pr", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("socket not found"));
}

#[test]
fn test_server_status_and_stop_without_daemon() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .args(["server", "status"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("not running"));
    csd(home.path())
        .args(["server", "stop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no server running"));
}

#[test]
fn test_current_and_clear() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .arg("current")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No codespace selected"));

    std::fs::create_dir_all(home.path().join(".csd")).unwrap();
    std::fs::write(home.path().join(".csd").join("current"), "cs-1\n").unwrap();
    csd(home.path()).arg("current").assert().success().stdout("cs-1\n");

    csd(home.path()).args(["select", "--clear"]).assert().success();
    csd(home.path()).arg("current").assert().code(1);
}

#[test]
fn test_ssh_without_target() {
    let home = TempDir::new().unwrap();
    csd(home.path())
        .arg("ssh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no codespace specified"));
}

#[test]
fn test_local_roundtrip_through_daemon() {
    let home = TempDir::new().unwrap();
    let _server = Server::spawn(home.path());

    csd(home.path())
        .args(["server", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Server running"));

    let marker = home.path().join("marker");
    csd(home.path())
        .args(["local", "touch", marker.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not allowed (allowed: gh)"));
    assert!(!marker.exists());

    csd(home.path())
        .args(["server", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Server stopped"));

    let socket = home.path().join(".csd").join("csd.socket");
    let deadline = Instant::now() + Duration::from_secs(10);
    while socket.exists() {
        assert!(Instant::now() < deadline, "socket was not removed");
        std::thread::sleep(Duration::from_millis(50));
    }
}

// The config directory only follows XDG_CONFIG_HOME on Linux.
#[cfg(target_os = "linux")]
#[test]
fn test_allow_list_from_config() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join(".config").join("csd");
    std::fs::create_dir_all(&config_dir).unwrap();
    let config = "[server]\nallowed_commands = [\"echo\"]\n";
    std::fs::write(config_dir.join("config.toml"), config).unwrap();
    let _server = Server::spawn(home.path());

    csd(home.path())
        .args(["local", "echo", "hi", "--there"])
        .assert()
        .success()
        .stdout("hi --there\n");
}

#[cfg(target_os = "linux")]
#[test]
fn test_config_init_then_show() {
    let home = TempDir::new().unwrap();
    let path = home.path().join(".config").join("csd").join("config.toml");

    csd(home.path())
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at"));
    assert!(path.exists());

    csd(home.path())
        .args(["config", "--init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    csd(home.path())
        .arg("config")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("# Config file:")
                .and(predicate::str::contains("allowed_commands = [\"gh\"]")),
        );
}

#[cfg(target_os = "linux")]
#[test]
fn test_config_edit_creates_file_and_runs_editor() {
    let home = TempDir::new().unwrap();
    let path = home.path().join(".config").join("csd").join("config.toml");

    csd(home.path()).args(["config", "--edit"]).env("EDITOR", "true").assert().success();
    assert!(path.exists());

    csd(home.path()).args(["config", "-e"]).env("EDITOR", "false").assert().code(1);
}
