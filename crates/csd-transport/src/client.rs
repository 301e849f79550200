//! Exec client: one request, one response, over the daemon socket.
//!
//! Requests are never retried here: an allowed command may have side effects,
//! so a transport failure is reported to the caller as-is.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tokio::{io::BufReader, net::UnixStream};

use crate::protocol::{self, CodecError, ExecRequest, ExecResponse};

/// Default time allowed to establish the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for the daemon to answer; commands may take a while.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client error. Every variant maps to exit code 1.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(
        "socket not found at {socket}\n\n\
         This command only works inside a codespace connected via 'csd ssh'.\n\n\
         Make sure:\n  \
         1. On your local machine: csd server start\n  \
         2. Connect to the codespace: csd ssh\n  \
         3. Then run: csd local gh <command>",
        socket = .path.display()
    )]
    SocketMissing { path: PathBuf },
    #[error(
        "failed to connect to local daemon at {socket}: {source}\n\n\
         Make sure:\n  \
         1. csd server is running on your local machine\n  \
         2. You connected via 'csd ssh' (not plain 'gh cs ssh')",
        socket = .path.display()
    )]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("failed to send request: {0}")]
    Send(#[source] CodecError),
    #[error("failed to read response: {0}")]
    Receive(#[source] CodecError),
}

impl ClientError {
    /// Process exit code for local transport and protocol failures.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Exit code the caller should terminate with for `response`.
///
/// Errors use the daemon's failure code (never zero); completed commands pass
/// their own code through.
#[must_use]
pub fn exit_code_for(response: &ExecResponse) -> i32 {
    if response.is_error() && response.exit_code == 0 {
        1
    } else {
        response.exit_code
    }
}

/// Client for the daemon channel.
#[derive(Debug, Clone)]
pub struct ExecClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl ExecClient {
    /// Create a client for the socket at `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Client for the well-known socket path.
    ///
    /// # Errors
    /// Returns error if the home directory cannot be determined.
    pub fn with_default_socket() -> io::Result<Self> {
        Ok(Self::new(csd_core::paths::socket_path()?))
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Socket this client talks to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for its response.
    ///
    /// # Errors
    /// Returns a [`ClientError`] for any transport or protocol failure.
    pub async fn send(&self, request: &ExecRequest) -> Result<ExecResponse, ClientError> {
        if !self.socket_path.exists() {
            return Err(ClientError::SocketMissing {
                path: self.socket_path.clone(),
            });
        }

        let connect = UnixStream::connect(&self.socket_path);
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| ClientError::Timeout("connecting to daemon"))?
            .map_err(|source| ClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        tokio::time::timeout(self.response_timeout, exchange(stream, request))
            .await
            .map_err(|_| ClientError::Timeout("waiting for daemon response"))?
    }

    /// Ask the daemon to run `command`.
    ///
    /// # Errors
    /// See [`ExecClient::send`].
    pub async fn exec(
        &self,
        command: Vec<String>,
        workdir: Option<String>,
    ) -> Result<ExecResponse, ClientError> {
        self.send(&ExecRequest::exec(command, workdir)).await
    }

    /// Liveness check.
    ///
    /// # Errors
    /// See [`ExecClient::send`].
    pub async fn status(&self) -> Result<ExecResponse, ClientError> {
        self.send(&ExecRequest::status()).await
    }

    /// Ask the daemon to shut down.
    ///
    /// # Errors
    /// See [`ExecClient::send`].
    pub async fn stop(&self) -> Result<ExecResponse, ClientError> {
        self.send(&ExecRequest::stop()).await
    }

    /// Whether a daemon at this socket answers a status request.
    pub async fn is_responsive(&self) -> bool {
        match self.status().await {
            Ok(response) => !response.is_error(),
            Err(e) => {
                tracing::debug!(socket = %self.socket_path.display(), "Liveness probe failed: {e}");
                false
            }
        }
    }
}

async fn exchange(stream: UnixStream, request: &ExecRequest) -> Result<ExecResponse, ClientError> {
    let (reader, mut writer) = stream.into_split();
    let line = request.encode().map_err(ClientError::Send)?;
    protocol::write_message(&mut writer, &line)
        .await
        .map_err(ClientError::Send)?;

    let mut reader = BufReader::new(reader);
    protocol::read_response(&mut reader)
        .await
        .map_err(ClientError::Receive)
}
