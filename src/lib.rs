//! # Statekeeper
//!
//! A keyed reactive state store for dashboard-style applications.
//!
//! A [`Store`] holds one snapshot of named values. Collaborators read it with
//! [`Store::get`] and [`Store::get_state`], change it with
//! [`Store::set_state`], and react to changes with [`Store::subscribe`] or
//! [`Store::subscribe_all`]. On top of that the store provides:
//!
//! - Batching: [`Store::batch`] coalesces many writes into one commit
//! - History: a bounded, append-only log of what each commit changed
//! - Persistence: selected keys are mirrored to a [`StorageBackend`] and
//!   reloaded when the store is opened
//! - Computed values: [`Computed`] caches a derived value until one of its
//!   dependency keys changes
//!
//! ```
//! use serde_json::json;
//! use statekeeper::{defaults, Patch, Store};
//!
//! let store = Store::in_memory(defaults::dashboard_defaults());
//! let search = store
//!     .subscribe("searchTerm", |change| {
//!         assert_eq!(change.new, Some(json!("foo").into()));
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! store.set_state(Patch::new().set("searchTerm", json!("foo"))).unwrap();
//! assert_eq!(store.get("searchTerm").unwrap(), Some(json!("foo").into()));
//! search.unsubscribe();
//! ```

pub mod computed;
pub mod config;
pub mod defaults;
pub mod error;
pub mod history;
pub mod persist;
pub mod store;
pub mod subscription;
pub mod value;

// Re-export main types for convenience
pub use computed::Computed;
pub use config::StoreConfig;
pub use error::{CallbackError, PersistError, PersistenceFailure, StorageError, StoreError};
pub use history::HistoryEntry;
pub use persist::{FileStorage, MemoryStorage, StorageBackend};
pub use store::{CommitReport, Store, StoreStats};
pub use subscription::{KeyChange, SnapshotChange, Subscription, SubscriptionId};
pub use value::{Keys, Patch, Snapshot, StateValue, Update};
