//! Store configuration.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Tuning and persistence settings for a [`Store`](crate::Store).
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use statekeeper::StoreConfig;
///
/// let config = StoreConfig::from_json(r#"{"persistent_keys": ["applications"]}"#).unwrap();
/// assert_eq!(config.max_history, 50);
/// assert!(config.is_persistent("applications"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix for persisted record names, so several stores can share one
    /// storage backend.
    pub namespace: String,
    /// Keys mirrored to durable storage on every commit that changes them.
    pub persistent_keys: Vec<String>,
    /// Maximum number of history entries kept.
    pub max_history: usize,
    /// Number of entries `get_history(None)` returns.
    pub default_history_limit: usize,
    /// Log every commit at debug level through a wildcard listener.
    pub log_changes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "state".to_string(),
            persistent_keys: Vec::new(),
            max_history: 50,
            default_history_limit: 10,
            log_changes: false,
        }
    }
}

impl StoreConfig {
    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::InvalidConfig(e.to_string()))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_persistent_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persistent_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_log_changes(mut self, enabled: bool) -> Self {
        self.log_changes = enabled;
        self
    }

    pub fn is_persistent(&self, key: &str) -> bool {
        self.persistent_keys.iter().any(|k| k == key)
    }

    /// Storage record name for a persistent key.
    pub fn record_name(&self, key: &str) -> String {
        format!("{}_{}", self.namespace, key)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.namespace.is_empty() {
            return Err(StoreError::InvalidConfig("namespace must not be empty".into()));
        }
        if self.max_history == 0 {
            return Err(StoreError::InvalidConfig("max_history must be at least 1".into()));
        }
        if let Some(key) = self.persistent_keys.iter().find(|k| k.is_empty()) {
            return Err(StoreError::InvalidKey(key.clone()));
        }
        Ok(())
    }
}
