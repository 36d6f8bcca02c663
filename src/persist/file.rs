//! File-backed storage.
//!
//! Layout inside the storage directory:
//! ```text
//! dashboard_state_applications.json     - one JSON document per record
//! dashboard_state_userPreferences.json
//! ```

use super::StorageBackend;
use crate::error::StorageError;
use std::path::{Path, PathBuf};

/// Stores each record as `<name>.json` under a root directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open or create file storage at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        let path = self.record_path(name)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let path = self.record_path(name)?;
        std::fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.record_path(name)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
