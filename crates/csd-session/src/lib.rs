//! Session orchestration for remote development environments.
//!
//! Provides:
//! - `SessionManager` - retry loop around the interactive session
//! - `ForwarderSupervisor` - auxiliary port forwarder scoped to one attempt
//! - `GhCodespaceLauncher` - session and forwarder commands for codespaces
//! - `TabTitle` - terminal tab title refreshed before each attempt
//! - Remembered-target storage (memory, file)

pub mod display;
pub mod forwarder;
pub mod launcher;
pub mod manager;
pub mod storage;

pub use display::{NoDisplay, SessionDisplay, TabTitle};
pub use forwarder::ForwarderSupervisor;
pub use launcher::{GhCodespaceLauncher, ReverseForward, SessionLauncher};
pub use manager::{
    AttemptOutcome, AttemptRecord, RetryPolicy, SessionEnd, SessionError, SessionManager,
    SessionReport, classify,
};
pub use storage::{FileTargetStore, MemoryTargetStore, StorageError, TargetStore};
