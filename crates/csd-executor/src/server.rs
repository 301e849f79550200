//! Unix socket server for the local execution daemon.
//!
//! One request per connection, each connection on its own task. Shutdown
//! stops accepting, drains in-flight handlers within a deadline, aborts the
//! rest and removes the socket file.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use csd_core::paths;
use csd_transport::ExecClient;
use thiserror::Error;
use tokio::{net::UnixListener, sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{handler::handle_connection, policy::AllowList, runner::CommandRunner};

/// Default time in-flight requests get to finish after shutdown begins.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the liveness probe sent to an occupied socket path.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Daemon error.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("server already running on {}", .0.display())]
    AlreadyRunning(PathBuf),
    #[error("failed to listen on socket {socket}: {source}", socket = .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare socket directory: {0}")]
    SocketDir(#[source] io::Error),
    #[error("failed to remove stale socket: {0}")]
    StaleSocket(#[source] io::Error),
}

/// Lifecycle of a daemon instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    NotListening,
    Listening,
    ShuttingDown,
    Stopped,
}

/// Daemon settings, fixed at start.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub allow_list: AllowList,
    pub drain_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            allow_list: AllowList::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// A bound daemon, ready to serve.
#[derive(Debug)]
pub struct Daemon {
    listener: UnixListener,
    socket_path: PathBuf,
    runner: CommandRunner,
    drain_timeout: Duration,
    state: watch::Sender<DaemonState>,
}

impl Daemon {
    /// Bind the socket at `socket_path`.
    ///
    /// If the path is occupied, a status probe decides whether another daemon
    /// owns it. A dead socket is removed and the bind retried once.
    ///
    /// # Errors
    /// Returns [`DaemonError::AlreadyRunning`] if a live daemon answers on
    /// the path, or a bind/filesystem error.
    pub async fn listen(
        socket_path: impl Into<PathBuf>,
        config: DaemonConfig,
    ) -> Result<Self, DaemonError> {
        let socket_path = socket_path.into();
        paths::ensure_private_parent(&socket_path).map_err(DaemonError::SocketDir)?;

        let (state, _) = watch::channel(DaemonState::NotListening);
        let listener = bind(&socket_path).await?;
        state.send_replace(DaemonState::Listening);

        Ok(Self {
            listener,
            socket_path,
            runner: CommandRunner::new(config.allow_list),
            drain_timeout: config.drain_timeout,
            state,
        })
    }

    /// Socket this daemon is bound to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Subscribe to lifecycle changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Accept connections until `shutdown` fires or a client sends a stop
    /// request.
    pub async fn serve(self, shutdown: CancellationToken) {
        let Self {
            listener,
            socket_path,
            runner,
            drain_timeout,
            state,
        } = self;

        // A stop request ends this daemon only, never the caller's scope.
        let stop = shutdown.child_token();
        let mut handlers = JoinSet::new();

        tracing::info!(
            socket = %socket_path.display(),
            allowed = %runner.allow_list(),
            "Server listening"
        );

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let runner = runner.clone();
                        let stop = stop.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, runner, stop).await {
                                tracing::debug!("Connection ended with error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Error accepting connection: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection handler panicked: {e}");
                    }
                }
            }
        }

        state.send_replace(DaemonState::ShuttingDown);
        tracing::info!(in_flight = handlers.len(), "Shutting down server");
        drop(listener);

        let drained = tokio::time::timeout(drain_timeout, async {
            while handlers.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(
                pending = handlers.len(),
                "Drain timeout elapsed, aborting in-flight requests"
            );
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }

        if let Err(e) = paths::remove_if_exists(&socket_path) {
            tracing::warn!(socket = %socket_path.display(), "Failed to remove socket: {e}");
        }
        state.send_replace(DaemonState::Stopped);
        tracing::info!("Server stopped");
    }
}

async fn bind(path: &Path) -> Result<UnixListener, DaemonError> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            let probe = ExecClient::new(path)
                .connect_timeout(PROBE_TIMEOUT)
                .response_timeout(PROBE_TIMEOUT);
            if probe.is_responsive().await {
                return Err(DaemonError::AlreadyRunning(path.to_path_buf()));
            }

            tracing::info!(socket = %path.display(), "Removing stale socket");
            paths::remove_if_exists(path).map_err(DaemonError::StaleSocket)?;
            UnixListener::bind(path).map_err(|source| DaemonError::Bind {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(DaemonError::Bind {
            path: path.to_path_buf(),
            source,
        }),
    }
}
