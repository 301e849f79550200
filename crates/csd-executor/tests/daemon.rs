#![cfg(unix)]

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use csd_executor::{AllowList, Daemon, DaemonConfig, DaemonError};
use csd_transport::{ClientError, ExecClient};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

struct Running {
    _dir: TempDir,
    socket: PathBuf,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    fn client(&self) -> ExecClient {
        ExecClient::new(&self.socket).response_timeout(Duration::from_secs(10))
    }
}

async fn start(allowed: &[&str], drain_timeout: Duration) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("csd.socket");
    let config = DaemonConfig {
        allow_list: AllowList::new(allowed.iter().copied()),
        drain_timeout,
    };
    let daemon = Daemon::listen(&socket, config).await.unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(daemon.serve(token.clone()));
    Running {
        _dir: dir,
        socket,
        token,
        task,
    }
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn test_exec_allowed_command() {
    let daemon = start(&["echo"], Duration::from_secs(5)).await;

    let response = daemon.client().exec(argv(&["echo", "hi"]), None).await.unwrap();
    assert_eq!(response.stdout, "hi\n");
    assert_eq!(response.stderr, "");
    assert_eq!(response.exit_code, 0);
    assert_eq!(response.error, None);

    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_absolute_path_matches_basename() {
    let daemon = start(&["sh"], Duration::from_secs(5)).await;

    let response = daemon
        .client()
        .exec(argv(&["/bin/sh", "-c", "exit 7"]), None)
        .await
        .unwrap();
    assert_eq!(response.exit_code, 7);
    assert_eq!(response.error, None);

    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_disallowed_command_has_no_side_effects() {
    let daemon = start(&["gh"], Duration::from_secs(5)).await;
    let marker = daemon.socket.with_file_name("marker");

    let response = daemon
        .client()
        .exec(argv(&["touch", marker.to_str().unwrap()]), None)
        .await
        .unwrap();
    assert_eq!(response.exit_code, 1);
    assert_eq!(
        response.error.as_deref(),
        Some("command \"touch\" not allowed (allowed: gh)")
    );
    assert!(!marker.exists());

    // The daemon keeps serving after a rejection.
    assert!(daemon.client().is_responsive().await);

    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_empty_command() {
    let daemon = start(&["gh"], Duration::from_secs(5)).await;

    let response = daemon.client().exec(Vec::new(), None).await.unwrap();
    assert_eq!(response.error.as_deref(), Some("no command specified"));
    assert_eq!(response.exit_code, 1);

    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_unknown_request_type() {
    let daemon = start(&["gh"], Duration::from_secs(5)).await;

    let mut stream = UnixStream::connect(&daemon.socket).await.unwrap();
    stream.write_all(b"{\"type\":\"reboot\"}\n").await.unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    assert!(reply.contains("unknown request type: reboot"));

    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_status_answers_while_command_runs() {
    let daemon = start(&["sleep"], Duration::from_secs(5)).await;

    let client = daemon.client();
    let slow = tokio::spawn(async move { client.exec(argv(&["sleep", "2"]), None).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let status = daemon.client().status().await.unwrap();
    assert_eq!(status.stdout, "running");
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(slow.await.unwrap().unwrap().exit_code, 0);
    daemon.token.cancel();
    daemon.task.await.unwrap();
}

#[tokio::test]
async fn test_stop_request() {
    let daemon = start(&["gh"], Duration::from_secs(5)).await;

    let response = daemon.client().stop().await.unwrap();
    assert_eq!(response.stdout, "stopping");

    tokio::time::timeout(Duration::from_secs(7), daemon.task)
        .await
        .expect("daemon stops within the drain deadline")
        .unwrap();
    assert!(!daemon.socket.exists());
    assert!(!daemon.token.is_cancelled());

    let err = tokio_test::assert_err!(ExecClient::new(&daemon.socket).status().await);
    assert!(matches!(err, ClientError::SocketMissing { .. }));
}

#[tokio::test]
async fn test_shutdown_aborts_stuck_requests() {
    let daemon = start(&["sleep"], Duration::from_millis(200)).await;

    let client = daemon.client();
    let stuck = tokio::spawn(async move { client.exec(argv(&["sleep", "30"]), None).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    daemon.token.cancel();
    daemon.task.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let outcome = stuck.await.unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("csd.socket");

    // Leave a socket file behind with nobody listening on it.
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let daemon = Daemon::listen(&socket, DaemonConfig::default()).await.unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(daemon.serve(token.clone()));

    assert!(ExecClient::new(&socket).is_responsive().await);
    token.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_live_daemon_is_not_replaced() {
    let daemon = start(&["gh"], Duration::from_secs(5)).await;

    let err = Daemon::listen(&daemon.socket, DaemonConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::AlreadyRunning(_)));
    assert!(err.to_string().contains("already running"));

    // The original keeps serving.
    assert!(daemon.client().is_responsive().await);
    daemon.token.cancel();
    daemon.task.await.unwrap();
}
