use super::{Snapshot, StateValue};
use std::fmt;

/// An ordered set of top-level key writes.
///
/// Writing the same key twice keeps its first position and its last value.
/// A `None` value removes the key from the snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    entries: Vec<(String, Option<StateValue>)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Patch::insert`].
    pub fn set(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.write(key.into(), Some(value.into()));
    }

    /// Remove `key` from the snapshot when applied.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.write(key.into(), None);
    }

    fn write(&mut self, key: String, value: Option<StateValue>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Fold `other` into this patch, later writes winning.
    pub fn merge(&mut self, other: Patch) {
        for (key, value) in other.entries {
            self.write(key, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<Option<&StateValue>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow-merge onto `base`, producing a new snapshot.
    pub(crate) fn apply_to(&self, base: &Snapshot) -> Snapshot {
        let mut next = base.clone();
        for (key, value) in &self.entries {
            match value {
                Some(value) => {
                    next.insert(key.clone(), value.clone());
                }
                None => {
                    next.remove(key);
                }
            }
        }
        next
    }
}

impl<K, V> FromIterator<(K, V)> for Patch
where
    K: Into<String>,
    V: Into<StateValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut patch = Patch::new();
        for (key, value) in iter {
            patch.insert(key, value);
        }
        patch
    }
}

type Updater = Box<dyn FnOnce(&Snapshot) -> Patch>;

/// Input to [`Store::set_state`](crate::Store::set_state).
///
/// Either a ready-made patch, or a function of the current snapshot that
/// returns one. The function must not have side effects.
pub enum Update {
    Patch(Patch),
    With(Updater),
}

impl Update {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(&Snapshot) -> Patch + 'static,
    {
        Update::With(Box::new(f))
    }

    pub(crate) fn resolve(self, current: &Snapshot) -> Patch {
        match self {
            Update::Patch(patch) => patch,
            Update::With(f) => f(current),
        }
    }
}

impl From<Patch> for Update {
    fn from(patch: Patch) -> Self {
        Update::Patch(patch)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Patch(patch) => f.debug_tuple("Patch").field(patch).finish(),
            Update::With(_) => f.write_str("With(..)"),
        }
    }
}
