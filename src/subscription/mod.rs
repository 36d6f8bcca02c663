//! Key-scoped and wildcard subscriptions.
//!
//! Key subscribers are invoked once per changed key they listen to, with
//! that key's new and old value. Wildcard subscribers are invoked once per
//! commit with both snapshots and the list of changed keys. A failing
//! callback is logged and skipped; it never aborts the commit.

mod subscription;

pub(crate) use subscription::{dispatch, Delivery, Listener, Registry};
pub use subscription::{KeyChange, SnapshotChange, Subscription, SubscriptionId, Topic};
