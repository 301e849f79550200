//! In-memory target storage.

use std::sync::RwLock;

use async_trait::async_trait;

use super::{StorageError, TargetStore};

/// In-memory storage implementation.
///
/// Useful in tests and for one-shot invocations. Data is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    current: RwLock<Option<String>>,
}

impl MemoryTargetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .current
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .clone())
    }

    async fn set(&self, name: &str) -> Result<(), StorageError> {
        let name = name.trim();
        let mut current = self
            .current
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        *current = (!name.is_empty()).then(|| name.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self
            .current
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))? = None;
        Ok(())
    }
}
