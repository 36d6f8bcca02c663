//! State values, snapshots and patches.
//!
//! A [`Snapshot`] maps top-level keys to [`StateValue`]s. Mutations are
//! described as a [`Patch`] (or an [`Update`] that produces one) and are
//! applied as a shallow merge: a key in the patch replaces the previous
//! value wholesale.

mod keys;
mod patch;
mod path;
mod value;

pub use keys::Keys;
pub use patch::{Patch, Update};
pub use path::lookup;
pub(crate) use path::segments;
pub use value::{Snapshot, StateValue};
