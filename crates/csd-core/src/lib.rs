//! Shared building blocks for the csd daemon and session tooling.
//!
//! Provides:
//! - `ProcessHandle` - Spawn, wait on, signal and kill external commands
//! - `shutdown_token` - A cancellation token wired to OS termination signals
//! - `Target` / `ForwardRule` - Session target identity and port forwarding rules
//! - Well-known per-user paths (`paths`)

pub mod cancel;
pub mod paths;
pub mod process;
pub mod target;

pub use cancel::shutdown_token;
pub use process::{
    CapturedOutput, CommandSpec, OutputMode, ProcessError, ProcessHandle, ProcessSignal,
    Termination, exit_code,
};
pub use target::{ForwardRule, Target, TargetError, resolve_target};
pub use tokio_util::sync::CancellationToken;
