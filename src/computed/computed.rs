use crate::store::Store;
use crate::value::{self, Snapshot, StateValue};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

struct ComputedCache<T> {
    /// Result of the last computation (None only before the first `get`).
    value: Option<T>,
    /// Dependency values the cached result was computed from.
    inputs: Vec<Option<StateValue>>,
    /// Bumped by exactly 1 per recomputation.
    version: u64,
}

/// A memoized value derived from store state.
///
/// Cloning a `Computed` creates a new handle to the same cache.
///
/// # Invariants
///
/// 1. The compute function runs on the first `get()`.
/// 2. Afterwards it runs again only if at least one dependency value differs
///    from the one seen at the last computation.
/// 3. Dependency values and the snapshot passed to the compute function come
///    from the same commit.
pub struct Computed<T> {
    store: Store,
    dependencies: Arc<[String]>,
    compute: Arc<dyn Fn(&Snapshot) -> T + Send + Sync>,
    cache: Arc<Mutex<ComputedCache<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dependencies: Arc::clone(&self.dependencies),
            compute: Arc::clone(&self.compute),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Clone + Send + 'static> Computed<T> {
    pub(crate) fn new<F>(store: Store, dependencies: Vec<String>, compute: F) -> Self
    where
        F: Fn(&Snapshot) -> T + Send + Sync + 'static,
    {
        Self {
            store,
            dependencies: dependencies.into(),
            compute: Arc::new(compute),
            cache: Arc::new(Mutex::new(ComputedCache {
                value: None,
                inputs: Vec::new(),
                version: 0,
            })),
        }
    }

    /// Get the current value, recomputing if a dependency changed.
    pub fn get(&self) -> T {
        let snapshot = self.store.get_state();
        let inputs: Vec<Option<StateValue>> = self
            .dependencies
            .iter()
            .map(|key| value::lookup(&snapshot, key).ok().flatten())
            .collect();

        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = &cache.value {
                if cache.inputs == inputs {
                    return cached.clone();
                }
            }
        }

        let value = (self.compute)(&snapshot);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.value = Some(value.clone());
        cache.inputs = inputs;
        cache.version += 1;
        value
    }

    /// Number of times the value has been computed.
    pub fn version(&self) -> u64 {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Computed")
            .field("dependencies", &self.dependencies)
            .field("cached", &cache.value)
            .field("version", &cache.version)
            .finish()
    }
}
