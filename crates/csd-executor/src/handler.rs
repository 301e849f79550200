//! Per-connection request handling.

use std::time::Duration;

use csd_transport::{
    CodecError, ExecRequest, ExecResponse, RequestKind,
    protocol::{read_request, write_message},
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::UnixStream,
};
use tokio_util::sync::CancellationToken;

use crate::runner::CommandRunner;

/// Time a client has to send its request after connecting.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// What the server does once the reply has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterReply {
    Continue,
    Shutdown,
}

/// Dispatch a decoded request.
pub async fn handle_request(
    request: &ExecRequest,
    runner: &CommandRunner,
) -> (ExecResponse, AfterReply) {
    tracing::info!(kind = %request.kind, command = ?request.command, "Received request");

    match &request.kind {
        RequestKind::Exec => {
            let response = runner.run(&request.command, request.workdir.as_deref()).await;
            (response, AfterReply::Continue)
        }
        RequestKind::Status => (ExecResponse::ack("running"), AfterReply::Continue),
        RequestKind::Stop => {
            tracing::info!("Received stop command");
            (ExecResponse::ack("stopping"), AfterReply::Shutdown)
        }
        RequestKind::Unknown(kind) => (
            ExecResponse::failure(format!("unknown request type: {kind}"), 1),
            AfterReply::Continue,
        ),
    }
}

/// Serve one connection: read one request, write one response, close.
///
/// A stop request cancels `shutdown` after its acknowledgement is flushed.
pub(crate) async fn handle_connection(
    stream: UnixStream,
    runner: CommandRunner,
    shutdown: CancellationToken,
) -> Result<(), CodecError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let read = tokio::time::timeout(READ_TIMEOUT, read_request(&mut reader)).await;
    let (response, after) = match read {
        Ok(Ok(request)) => handle_request(&request, &runner).await,
        Ok(Err(CodecError::Eof)) => {
            tracing::debug!("Client closed without sending a request");
            return Ok(());
        }
        Ok(Err(CodecError::EmptyCommand)) => (
            ExecResponse::failure(CodecError::EmptyCommand.to_string(), 1),
            AfterReply::Continue,
        ),
        Ok(Err(e)) => {
            tracing::warn!("Failed to read request: {e}");
            (ExecResponse::failure(format!("invalid request: {e}"), 1), AfterReply::Continue)
        }
        Err(_) => {
            tracing::warn!("Timed out waiting for request");
            (
                ExecResponse::failure("timed out waiting for request", 1),
                AfterReply::Continue,
            )
        }
    };

    let written = match response.encode() {
        Ok(line) => write_message(&mut writer, &line).await,
        Err(e) => Err(e),
    };
    let _ = writer.shutdown().await;

    if after == AfterReply::Shutdown {
        shutdown.cancel();
    }
    written
}
