#![forbid(unsafe_code)]

use crate::StoreError;
use std::path::{Path, PathBuf};

/// Filesystem presence of the rendezvous address.
///
/// Existence of the file says nothing about a listener; liveness is decided by the health
/// probe only.
#[derive(Clone, Debug)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        std::fs::symlink_metadata(&self.path).is_ok()
    }

    pub fn ensure_directory(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Removes a leftover address before a bind attempt. Returns whether a file was removed.
    pub fn clear_if_stale(&self) -> Result<bool, StoreError> {
        let removed = self.unlink()?;
        if removed {
            tracing::info!(path = %self.path.display(), "removed stale endpoint");
        }
        Ok(removed)
    }

    /// Final teardown once no client depends on the backend anymore.
    pub fn remove_if_present(&self) -> Result<bool, StoreError> {
        let removed = self.unlink()?;
        if removed {
            tracing::info!(path = %self.path.display(), "removed endpoint");
        }
        Ok(removed)
    }

    fn unlink(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
