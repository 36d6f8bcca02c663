//! The reactive state store.
//!
//! A [`Store`] owns one live [`Snapshot`](crate::Snapshot) and replaces it on
//! every commit. Commits record a bounded history, mirror persistent keys to
//! storage and notify subscribers, in that order.

mod store;

pub(crate) use store::Shared;
pub use store::{CommitReport, Store, StoreStats, LAST_UPDATED_KEY, WILDCARD};
