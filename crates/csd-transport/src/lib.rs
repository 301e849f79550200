//! Wire protocol and client for the csd daemon channel.
//!
//! Provides:
//! - Protocol codec (`ExecRequest` / `ExecResponse`, newline-delimited JSON)
//! - `ExecClient` - send one request over the forwarded Unix socket

pub mod client;
pub mod protocol;

pub use client::{ClientError, ExecClient, exit_code_for};
pub use protocol::{CodecError, ExecRequest, ExecResponse, RequestKind};
