use super::{Snapshot, StateValue};
use crate::error::StoreError;
use serde_json::Value;

/// Split a dot-separated key into segments, rejecting empty keys and empty
/// segments.
pub(crate) fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    if path.is_empty() {
        return Err(StoreError::InvalidKey(path.to_string()));
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::InvalidKey(path.to_string()));
    }
    Ok(parts)
}

/// Look up a dot-separated path in a snapshot.
///
/// The first segment names a top-level key; later segments index into JSON
/// objects by name and into arrays by position. Returns `Ok(None)` as soon
/// as a segment is missing.
pub fn lookup(snapshot: &Snapshot, path: &str) -> Result<Option<StateValue>, StoreError> {
    let parts = segments(path)?;
    let Some(root) = snapshot.get(parts[0]) else {
        return Ok(None);
    };
    if parts.len() == 1 {
        return Ok(Some(root.clone()));
    }
    let Some(mut current) = root.as_json() else {
        return Ok(None);
    };
    for part in &parts[1..] {
        let next = match current {
            Value::Object(map) => map.get(*part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(StateValue::from(current.clone())))
}
