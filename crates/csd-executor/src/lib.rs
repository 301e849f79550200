//! Local execution daemon.
//!
//! Provides:
//! - `AllowList` - the fixed set of executables remote callers may run
//! - `CommandRunner` - policy check plus captured execution
//! - `Daemon` - Unix socket server with stale-socket recovery and graceful drain

mod handler;
pub mod policy;
pub mod runner;
pub mod server;

pub use handler::{AfterReply, handle_request};
pub use policy::{AllowList, PolicyDecision};
pub use runner::CommandRunner;
pub use server::{Daemon, DaemonConfig, DaemonError, DaemonState};
