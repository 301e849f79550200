//! Process handles for external commands.
//!
//! Every external binary csd runs (an allowed command on behalf of the remote,
//! the interactive SSH session, the port forwarder) goes through
//! [`ProcessHandle`], which owns the child and knows how to wait on it,
//! signal it and kill it.

use std::{
    fmt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use thiserror::Error;
use tokio::process::{Child, Command};

/// Process error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Process output was not captured")]
    NotCaptured,
    #[error("Failed to signal process: {0}")]
    Signal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A program and its arguments, ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed after the program.
    pub args: Vec<String>,
    /// Working directory override.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Build a spec from an argv-style slice (`argv[0]` is the program).
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    /// Append one argument.
    #[must_use]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-quoted rendering, for logs and messages.
    #[must_use]
    pub fn display(&self) -> String {
        let words =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words.clone()).unwrap_or_else(|_| words.collect::<Vec<_>>().join(" "))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Where a child's standard streams go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// stdout/stderr are piped and collected in full; stdin is closed.
    Captured,
    /// All three streams are inherited from this process.
    Passthrough,
    /// All three streams are connected to the null device.
    Discard,
}

impl OutputMode {
    fn apply(self, cmd: &mut Command) {
        match self {
            Self::Captured => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            Self::Passthrough => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            Self::Discard => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }
    }
}

/// Signals csd sends to the processes it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl ProcessSignal {
    const fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

/// Output of a process spawned in [`OutputMode::Captured`].
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CapturedOutput {
    /// Numeric exit code (see [`exit_code`]).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        exit_code(self.status)
    }
}

/// How a [`ProcessHandle::terminate`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before it was asked to stop.
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period after SIGTERM.
    Graceful(ExitStatus),
    /// The grace period elapsed and the process was killed.
    Forced(ExitStatus),
}

/// Map an exit status to a shell-style exit code.
///
/// Processes killed by a signal report `128 + signal`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

enum ChildKind {
    Plain(Child),
    Group(AsyncGroupChild),
}

/// Owned handle to a running external process.
pub struct ProcessHandle {
    child: ChildKind,
    mode: OutputMode,
    pid: Option<u32>,
    display: String,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("mode", &self.mode)
            .field("command", &self.display)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Spawn `spec` in the caller's process group.
    ///
    /// Captured processes are killed if the handle is dropped before they
    /// exit.
    ///
    /// # Errors
    /// Returns [`ProcessError::Spawn`] if the process cannot be started.
    pub fn start(spec: &CommandSpec, mode: OutputMode) -> Result<Self, ProcessError> {
        let mut cmd = spec.command();
        mode.apply(&mut cmd);
        if mode == OutputMode::Captured {
            cmd.kill_on_drop(true);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(?pid, ?mode, command = %spec, "Spawned process");

        Ok(Self {
            child: ChildKind::Plain(child),
            mode,
            pid,
            display: spec.display(),
        })
    }

    /// Spawn `spec` as the leader of a new process group, output discarded.
    ///
    /// Terminal interrupts aimed at the foreground group do not reach it, and
    /// signals sent through the handle reach every process in the group.
    ///
    /// # Errors
    /// Returns [`ProcessError::Spawn`] if the process cannot be started.
    pub fn start_detached(spec: &CommandSpec) -> Result<Self, ProcessError> {
        let mut cmd = spec.command();
        OutputMode::Discard.apply(&mut cmd);
        cmd.kill_on_drop(true);

        let child = cmd.group_spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(?pid, command = %spec, "Spawned detached process group");

        Ok(Self {
            child: ChildKind::Group(child),
            mode: OutputMode::Discard,
            pid,
            display: spec.display(),
        })
    }

    /// OS process id, as observed at spawn time.
    #[must_use]
    pub const fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    /// Returns error if waiting on the child fails.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = match &mut self.child {
            ChildKind::Plain(child) => child.wait().await?,
            ChildKind::Group(child) => child.wait().await?,
        };
        Ok(status)
    }

    /// Check whether the process has exited without blocking.
    ///
    /// # Errors
    /// Returns error if polling the child fails.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        let status = match &mut self.child {
            ChildKind::Plain(child) => child.try_wait()?,
            ChildKind::Group(child) => child.try_wait()?,
        };
        Ok(status)
    }

    /// Wait for exit and collect stdout/stderr in full.
    ///
    /// # Errors
    /// Returns [`ProcessError::NotCaptured`] unless the process was started in
    /// [`OutputMode::Captured`], or an I/O error if reading output fails.
    pub async fn wait_with_output(self) -> Result<CapturedOutput, ProcessError> {
        let Self { child, mode, .. } = self;
        match (mode, child) {
            (OutputMode::Captured, ChildKind::Plain(child)) => {
                let output = child.wait_with_output().await?;
                Ok(CapturedOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    status: output.status,
                })
            }
            _ => Err(ProcessError::NotCaptured),
        }
    }

    /// Deliver `signal` to the process (or its whole group when detached).
    ///
    /// Signalling a process that has already exited is a no-op.
    ///
    /// # Errors
    /// Returns error if the signal cannot be delivered.
    #[cfg(unix)]
    pub fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError> {
        use nix::{
            errno::Errno,
            sys::signal::{kill, killpg},
            unistd::Pid,
        };

        if self.try_wait()?.is_some() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|e| ProcessError::Signal(e.to_string()))?;
        let pid = Pid::from_raw(pid);

        let result = match self.child {
            ChildKind::Plain(_) => kill(pid, signal.as_nix()),
            ChildKind::Group(_) => killpg(pid, signal.as_nix()),
        };
        match result {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::Signal(e.to_string())),
        }
    }

    /// Deliver `signal` to the process.
    ///
    /// Only [`ProcessSignal::Kill`] is supported on this platform.
    ///
    /// # Errors
    /// Returns error for unsupported signals or if the kill fails.
    #[cfg(not(unix))]
    pub fn signal(&mut self, signal: ProcessSignal) -> Result<(), ProcessError> {
        if signal != ProcessSignal::Kill {
            return Err(ProcessError::Signal(format!(
                "{signal:?} is not supported on this platform"
            )));
        }
        match &mut self.child {
            ChildKind::Plain(child) => child.start_kill()?,
            ChildKind::Group(child) => child.start_kill()?,
        }
        Ok(())
    }

    /// Kill the process and reap it.
    ///
    /// # Errors
    /// Returns error if the kill or the final wait fails.
    pub async fn kill(&mut self) -> Result<ExitStatus, ProcessError> {
        self.signal(ProcessSignal::Kill)?;
        self.wait().await
    }

    /// Ask the process to stop, escalating to a kill after `grace`.
    ///
    /// # Errors
    /// Returns error if signalling or waiting fails.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Termination, ProcessError> {
        if let Some(status) = self.try_wait()? {
            return Ok(Termination::AlreadyExited(status));
        }

        if let Err(e) = self.signal(ProcessSignal::Terminate) {
            tracing::debug!(pid = ?self.pid, "SIGTERM failed, killing instead: {e}");
        } else if let Ok(status) = tokio::time::timeout(grace, self.wait()).await {
            return Ok(Termination::Graceful(status?));
        }

        tracing::warn!(
            pid = ?self.pid,
            command = %self.display,
            grace_ms = grace.as_millis(),
            "Process did not exit in time, killing"
        );
        let status = self.kill().await?;
        Ok(Termination::Forced(status))
    }
}
