use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use csd_core::paths;
use csd_executor::Daemon;
use csd_transport::{ClientError, ExecClient};

use crate::config::Config;

/// `~/.csd/csd.pid` for as long as the daemon runs.
struct PidFile(PathBuf);

impl PidFile {
    fn create(path: PathBuf) -> Option<Self> {
        match std::fs::write(&path, std::process::id().to_string()) {
            Ok(()) => Some(Self(path)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to write PID file: {e}");
                None
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = paths::remove_if_exists(&self.0);
    }
}

pub async fn start(config: &Config) -> Result<ExitCode> {
    let socket = paths::socket_path()?;
    let daemon = Daemon::listen(&socket, config.daemon_config()).await?;
    let _pid_file = PidFile::create(paths::pid_path()?);

    println!("Starting csd server on {}", socket.display());
    println!("Press Ctrl+C to stop");

    daemon.serve(csd_core::shutdown_token()).await;
    Ok(ExitCode::SUCCESS)
}

pub async fn stop() -> Result<ExitCode> {
    let socket = paths::socket_path()?;
    let client = ExecClient::new(&socket)
        .connect_timeout(Duration::from_secs(2))
        .response_timeout(Duration::from_secs(5));

    match client.stop().await {
        Ok(_) => {
            println!("Server stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(ClientError::SocketMissing { .. } | ClientError::Connect { .. }) => {
            signal_from_pid_file(&paths::pid_path()?)?;
            println!("Server stop signal sent");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e).context("failed to send stop command"),
    }
}

pub async fn status() -> Result<ExitCode> {
    let socket = paths::socket_path()?;
    let client = ExecClient::new(&socket)
        .connect_timeout(Duration::from_secs(1))
        .response_timeout(Duration::from_secs(1));

    if client.is_responsive().await {
        println!("Server running on {}", socket.display());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Server not running");
        Ok(ExitCode::FAILURE)
    }
}

pub fn socket() -> Result<ExitCode> {
    println!("{}", paths::socket_path()?.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
fn signal_from_pid_file(path: &Path) -> Result<()> {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let Ok(contents) = std::fs::read_to_string(path) else {
        bail!("no server running (cannot connect to socket and no PID file)");
    };
    let pid: i32 = contents.trim().parse().context("invalid PID file")?;
    if pid <= 0 {
        bail!("invalid PID file");
    }
    kill(Pid::from_raw(pid), Signal::SIGTERM).context("failed to stop server")?;
    Ok(())
}

#[cfg(not(unix))]
fn signal_from_pid_file(_path: &Path) -> Result<()> {
    bail!("no server running (cannot connect to socket)");
}
