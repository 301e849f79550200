//! Runs allow-listed commands and folds the outcome into a response.

use std::sync::Arc;

use csd_core::{CommandSpec, OutputMode, ProcessHandle};
use csd_transport::ExecResponse;

use crate::policy::{AllowList, PolicyDecision};

/// Policy check plus captured execution.
///
/// Cheap to clone; every connection handler holds one.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    allow_list: Arc<AllowList>,
}

impl CommandRunner {
    #[must_use]
    pub fn new(allow_list: AllowList) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
        }
    }

    /// The policy this runner enforces.
    #[must_use]
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Run `command` and report its output.
    ///
    /// Never fails: policy rejections and launch failures become error
    /// responses with exit code 1. A blank `workdir` means "inherit".
    pub async fn run(&self, command: &[String], workdir: Option<&str>) -> ExecResponse {
        let Some(spec) = CommandSpec::from_argv(command) else {
            return ExecResponse::failure("no command specified", 1);
        };

        if let PolicyDecision::Denied { program, reason } = self.allow_list.check(&spec.program) {
            tracing::warn!(
                %program,
                ?command,
                allowed = %self.allow_list,
                "Rejected command"
            );
            return ExecResponse::failure(reason, 1);
        }

        let spec = match workdir.map(str::trim).filter(|dir| !dir.is_empty()) {
            Some(dir) => spec.cwd(dir),
            None => spec,
        };

        tracing::info!(command = %spec, "Executing command");
        let output = match ProcessHandle::start(&spec, OutputMode::Captured) {
            Ok(handle) => handle.wait_with_output().await,
            Err(e) => Err(e),
        };

        match output {
            Ok(output) => {
                let exit_code = output.exit_code();
                tracing::info!(
                    exit_code,
                    stdout_len = output.stdout.len(),
                    stderr_len = output.stderr.len(),
                    "Command completed"
                );
                ExecResponse::completed(output.stdout, output.stderr, exit_code)
            }
            Err(e) => {
                tracing::error!("Command failed: {e}");
                ExecResponse::failure(format!("command failed: {e}"), 1)
            }
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(AllowList::default())
    }
}
