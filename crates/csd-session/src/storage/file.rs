//! File-backed target storage (`~/.csd/current`).

use std::{io, path::PathBuf};

use async_trait::async_trait;
use csd_core::paths;

use super::{StorageError, TargetStore};

/// Stores the remembered target as a single line in a file.
#[derive(Debug, Clone)]
pub struct FileTargetStore {
    path: PathBuf,
}

impl FileTargetStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the well-known location.
    ///
    /// # Errors
    /// Returns error if the home directory cannot be determined.
    pub fn default_location() -> io::Result<Self> {
        Ok(Self::new(paths::current_target_path()?))
    }
}

#[async_trait]
impl TargetStore for FileTargetStore {
    async fn get(&self) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let name = contents.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, name: &str) -> Result<(), StorageError> {
        paths::ensure_private_parent(&self.path)?;
        tokio::fs::write(&self.path, format!("{}\n", name.trim())).await?;
        tracing::debug!(name, path = %self.path.display(), "Saved current target");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        paths::remove_if_exists(&self.path)?;
        Ok(())
    }
}
