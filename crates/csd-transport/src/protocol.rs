//! Wire protocol between the exec client (inside the remote) and the daemon.
//!
//! Each connection carries exactly one request and one response, each a
//! single JSON object terminated by a newline (or by end of stream).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request the daemon accepts.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Largest response the client accepts.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("no command specified")]
    EmptyCommand,
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("connection closed before a message was received")]
    Eof,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request type tag.
///
/// Unknown tags decode successfully so the daemon can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestKind {
    /// Run a command.
    Exec,
    /// Liveness check.
    Status,
    /// Ask the daemon to shut down.
    Stop,
    /// Anything else.
    Unknown(String),
}

impl RequestKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exec => "exec",
            Self::Status => "status",
            Self::Stop => "stop",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for RequestKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "exec" => Self::Exec,
            "status" => Self::Status,
            "stop" => Self::Stop,
            _ => Self::Unknown(value),
        }
    }
}

impl From<RequestKind> for String {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message from the exec client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Request type.
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Program followed by its arguments. Required for `exec`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl ExecRequest {
    /// Request to run `command`.
    #[must_use]
    pub const fn exec(command: Vec<String>, workdir: Option<String>) -> Self {
        Self {
            kind: RequestKind::Exec,
            command,
            workdir,
        }
    }

    /// Liveness check request.
    #[must_use]
    pub const fn status() -> Self {
        Self {
            kind: RequestKind::Status,
            command: Vec::new(),
            workdir: None,
        }
    }

    /// Shutdown request.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            kind: RequestKind::Stop,
            command: Vec::new(),
            workdir: None,
        }
    }

    /// Serialize to a newline-terminated JSON line.
    ///
    /// # Errors
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_line(self)
    }

    /// Parse and validate a request.
    ///
    /// # Errors
    /// Returns [`CodecError::Decode`] for malformed input and
    /// [`CodecError::EmptyCommand`] for an `exec` request without a command.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let request: Self = serde_json::from_slice(bytes.trim_ascii()).map_err(CodecError::Decode)?;
        if request.kind == RequestKind::Exec && request.command.is_empty() {
            return Err(CodecError::EmptyCommand);
        }
        Ok(request)
    }
}

/// Message from the daemon back to the exec client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the request failed before or instead of producing a real
    /// process exit (policy, protocol or internal failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResponse {
    /// Result of a command that ran to completion.
    #[must_use]
    pub const fn completed(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            error: None,
        }
    }

    /// Failure response. The exit code is never zero.
    #[must_use]
    pub fn failure(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: if exit_code == 0 { 1 } else { exit_code },
            error: Some(message.into()),
        }
    }

    /// Successful acknowledgment carrying a short status word.
    #[must_use]
    pub fn ack(status: &str) -> Self {
        Self::completed(status.to_string(), String::new(), 0)
    }

    /// Error description, if any. Empty strings count as no error.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Whether this response reports a failure rather than a process result.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    /// Serialize to a newline-terminated JSON line.
    ///
    /// # Errors
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_line(self)
    }

    /// Parse a response.
    ///
    /// # Errors
    /// Returns [`CodecError::Decode`] for malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes.trim_ascii()).map_err(CodecError::Decode)
    }
}

fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    line.push(b'\n');
    Ok(line)
}

/// Read one message (up to a newline or end of stream), at most `limit` bytes.
///
/// # Errors
/// Returns [`CodecError::Eof`] if nothing arrives, [`CodecError::TooLarge`]
/// past the limit, or an I/O error.
pub async fn read_message<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    (&mut *reader).take(cap).read_until(b'\n', &mut buf).await?;

    if buf.is_empty() {
        return Err(CodecError::Eof);
    }
    if buf.len() > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(buf)
}

/// Write an encoded message and flush.
///
/// # Errors
/// Returns error if the write fails.
pub async fn write_message<W>(writer: &mut W, line: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a request.
///
/// # Errors
/// See [`read_message`] and [`ExecRequest::decode`].
pub async fn read_request<R>(reader: &mut R) -> Result<ExecRequest, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_message(reader, MAX_REQUEST_BYTES).await?;
    ExecRequest::decode(&line)
}

/// Read and decode a response.
///
/// # Errors
/// See [`read_message`] and [`ExecResponse::decode`].
pub async fn read_response<R>(reader: &mut R) -> Result<ExecResponse, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_message(reader, MAX_RESPONSE_BYTES).await?;
    ExecResponse::decode(&line)
}
