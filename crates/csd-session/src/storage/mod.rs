//! Remembered-target storage.
//!
//! The session loop never reads this itself: callers read the remembered
//! target once, pass it in, and write it back once after a successful
//! resolve.

mod file;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileTargetStore;
pub use memory::MemoryTargetStore;

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Persistence for the remembered session target.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// The remembered target name, if any.
    async fn get(&self) -> Result<Option<String>, StorageError>;

    /// Remember `name`.
    async fn set(&self, name: &str) -> Result<(), StorageError>;

    /// Forget the remembered target.
    async fn clear(&self) -> Result<(), StorageError>;
}
