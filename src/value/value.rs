use crate::error::PersistError;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The complete mapping of state keys to values at one point in time.
///
/// The store never mutates a published snapshot; each commit builds a new
/// map and swaps it in.
pub type Snapshot = BTreeMap<String, StateValue>;

/// A single state value.
///
/// Serializable data lives in [`StateValue::Json`]. Runtime objects that
/// cannot be serialized (live chart instances, timers) are stored as
/// [`StateValue::Handle`] and must not be placed under persistent keys.
///
/// Both variants are reference counted, so snapshots that share a value
/// share its allocation.
#[derive(Clone)]
pub enum StateValue {
    Json(Arc<Value>),
    Handle(Arc<dyn Any + Send + Sync>),
}

impl StateValue {
    /// Wrap a runtime object as a handle value.
    pub fn handle<T: Any + Send + Sync>(value: T) -> Self {
        StateValue::Handle(Arc::new(value))
    }

    /// Borrow the JSON payload, if this is a JSON value.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StateValue::Json(value) => Some(&**value),
            StateValue::Handle(_) => None,
        }
    }

    /// Get a typed reference to a handle value.
    pub fn downcast_handle<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            StateValue::Handle(handle) => Arc::clone(handle).downcast::<T>().ok(),
            StateValue::Json(_) => None,
        }
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, StateValue::Handle(_))
    }

    /// Whether both values point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateValue::Json(a), StateValue::Json(b)) => Arc::ptr_eq(a, b),
            (StateValue::Handle(a), StateValue::Handle(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    /// Serialize to the JSON text used for persisted records.
    pub fn to_json_string(&self) -> Result<String, PersistError> {
        match self {
            StateValue::Json(value) => Ok(serde_json::to_string(&**value)?),
            StateValue::Handle(_) => Err(PersistError::NotSerializable),
        }
    }

    /// Parse a persisted record back into a value.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(text).map(StateValue::from)
    }
}

/// JSON values compare by value, handles by identity.
impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateValue::Json(a), StateValue::Json(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => self.ptr_eq(other),
        }
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            StateValue::Handle(handle) => {
                write!(f, "Handle({:p})", Arc::as_ptr(handle) as *const ())
            }
        }
    }
}

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        StateValue::Json(Arc::new(value))
    }
}

impl From<Arc<Value>> for StateValue {
    fn from(value: Arc<Value>) -> Self {
        StateValue::Json(value)
    }
}

impl PartialEq<Value> for StateValue {
    fn eq(&self, other: &Value) -> bool {
        self.as_json() == Some(other)
    }
}
