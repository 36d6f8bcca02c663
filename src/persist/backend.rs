use crate::error::StorageError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A durable key-value sink for persisted state records.
///
/// The store makes a single write attempt per changed persistent key per
/// commit and never retries.
pub trait StorageBackend: Send + Sync {
    /// Read a record. `Ok(None)` means nothing was stored under `name`.
    fn read(&self, name: &str) -> Result<Option<String>, StorageError>;

    fn write(&self, name: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a record. Removing a missing record is not an error.
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// In-process storage with an optional byte quota.
///
/// Clones share the same records, which lets two stores in one process
/// observe each other's writes.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<BTreeMap<String, String>>>,
    quota: Option<usize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of stored values to `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::default()
        }
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage disabled".into()));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.get(name))
    }

    fn write(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota {
            let used: usize = records
                .iter()
                .filter(|(k, _)| k.as_str() != name)
                .map(|(_, v)| v.len())
                .sum();
            let available = quota.saturating_sub(used);
            if value.len() > available {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    available,
                });
            }
        }
        records.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}
