//! Error types for the store and its persistence layer.

/// Errors returned to the immediate caller for misuse of the store API.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid state key {0:?}")]
    InvalidKey(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid store config: {0}")]
    InvalidConfig(String),
}

/// Errors from a durable storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("invalid record name {0:?}")]
    InvalidName(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Why a single persistent key could not be written.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("value is a runtime handle and cannot be serialized")]
    NotSerializable,
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A persistence failure for one key of one commit.
///
/// The in-memory commit has already been applied when this is produced.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist {key:?}: {error}")]
pub struct PersistenceFailure {
    pub key: String,
    #[source]
    pub error: PersistError,
}

/// Error type returned by subscriber callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
