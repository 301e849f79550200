//! Auxiliary forwarder supervision.
//!
//! The forwarder runs detached in its own process group with output
//! discarded, so it neither receives terminal interrupts nor writes into the
//! interactive session. It lives exactly as long as one attempt.

use std::time::Duration;

use csd_core::{CommandSpec, ProcessError, ProcessHandle, Termination};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default time the forwarder gets to exit after SIGTERM.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Owns one forwarder process for the duration of an attempt.
#[derive(Debug)]
pub struct ForwarderSupervisor {
    pid: Option<u32>,
    scope: CancellationToken,
    task: Option<JoinHandle<Option<Termination>>>,
}

impl ForwarderSupervisor {
    /// Launch `spec` and supervise it until [`stop`](Self::stop) is called
    /// or the supervisor is dropped.
    ///
    /// # Errors
    /// Returns error if the process cannot be spawned.
    pub fn start(spec: &CommandSpec, grace: Duration) -> Result<Self, ProcessError> {
        let mut handle = ProcessHandle::start_detached(spec)?;
        let pid = handle.id();
        let scope = CancellationToken::new();
        let cancelled = scope.clone();

        tracing::info!(?pid, command = %spec, "Started forwarder");
        let task = tokio::spawn(async move {
            let exited = tokio::select! {
                status = handle.wait() => Some(status),
                () = cancelled.cancelled() => None,
            };

            match exited {
                Some(Ok(status)) => {
                    let exit_code = csd_core::exit_code(status);
                    tracing::warn!(exit_code, "Forwarder exited early");
                    Some(Termination::AlreadyExited(status))
                }
                Some(Err(e)) => {
                    tracing::warn!("Failed to wait for forwarder: {e}");
                    None
                }
                None => match handle.terminate(grace).await {
                    Ok(termination) => Some(termination),
                    Err(e) => {
                        tracing::warn!("Failed to stop forwarder: {e}");
                        None
                    }
                },
            }
        });

        Ok(Self {
            pid,
            scope,
            task: Some(task),
        })
    }

    /// OS process id of the forwarder (also its process group id).
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stop the forwarder and wait until it is gone.
    pub async fn stop(mut self) -> Option<Termination> {
        self.scope.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(termination) => {
                tracing::debug!(pid = ?self.pid, ?termination, "Forwarder stopped");
                termination
            }
            Err(e) => {
                tracing::warn!("Forwarder supervisor task failed: {e}");
                None
            }
        }
    }
}

impl Drop for ForwarderSupervisor {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
