use crate::error::CallbackError;
use crate::store::Shared;
use crate::value::{Snapshot, StateValue};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Unique id of a subscription within one store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    Key(String),
    Wildcard,
}

/// Delivered to key subscribers once per changed key they listen to.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyChange {
    pub key: String,
    pub new: Option<StateValue>,
    pub old: Option<StateValue>,
}

/// Delivered to wildcard subscribers once per commit.
#[derive(Clone, Debug)]
pub struct SnapshotChange {
    pub new: Arc<Snapshot>,
    pub old: Arc<Snapshot>,
    pub changed_keys: Vec<String>,
}

pub(crate) type KeyCallback = Arc<dyn Fn(&KeyChange) -> Result<(), CallbackError> + Send + Sync>;
pub(crate) type WildcardCallback =
    Arc<dyn Fn(&SnapshotChange) -> Result<(), CallbackError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Listener {
    Key(KeyCallback),
    Wildcard(WildcardCallback),
}

struct Entry {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    listener: Listener,
}

/// Subscriber table: topic -> listeners in registration order.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    topics: BTreeMap<Topic, Vec<Entry>>,
}

impl Registry {
    /// Register `listener` under every topic. The returned flag is shared
    /// with each entry and cleared on unsubscribe.
    pub(crate) fn add(
        &mut self,
        topics: &[Topic],
        listener: Listener,
    ) -> (SubscriptionId, Arc<AtomicBool>) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let active = Arc::new(AtomicBool::new(true));
        for topic in topics {
            self.topics.entry(topic.clone()).or_default().push(Entry {
                id,
                active: Arc::clone(&active),
                listener: listener.clone(),
            });
        }
        (id, active)
    }

    /// Remove `id` from every topic it was registered under. Returns whether
    /// anything was removed.
    pub(crate) fn remove(&mut self, id: SubscriptionId, topics: &[Topic]) -> bool {
        let mut removed = false;
        for topic in topics {
            if let Some(entries) = self.topics.get_mut(topic) {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                removed |= entries.len() != before;
                if entries.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        removed
    }

    /// Number of live (topic, listener) registrations.
    pub(crate) fn len(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    /// Build the delivery list for one commit: key listeners per changed key
    /// in commit order, then wildcard listeners.
    pub(crate) fn plan(&self, changes: &[KeyChange], with_wildcard: bool) -> Vec<Delivery> {
        let mut out = Vec::new();
        for (index, change) in changes.iter().enumerate() {
            let Some(entries) = self.topics.get(&Topic::Key(change.key.clone())) else {
                continue;
            };
            for entry in entries {
                if let Listener::Key(callback) = &entry.listener {
                    out.push(Delivery::Key {
                        id: entry.id,
                        active: Arc::clone(&entry.active),
                        index,
                        callback: Arc::clone(callback),
                    });
                }
            }
        }
        if with_wildcard {
            if let Some(entries) = self.topics.get(&Topic::Wildcard) {
                for entry in entries {
                    if let Listener::Wildcard(callback) = &entry.listener {
                        out.push(Delivery::Wildcard {
                            id: entry.id,
                            active: Arc::clone(&entry.active),
                            callback: Arc::clone(callback),
                        });
                    }
                }
            }
        }
        out
    }
}

pub(crate) enum Delivery {
    Key {
        id: SubscriptionId,
        active: Arc<AtomicBool>,
        index: usize,
        callback: KeyCallback,
    },
    Wildcard {
        id: SubscriptionId,
        active: Arc<AtomicBool>,
        callback: WildcardCallback,
    },
}

/// Invoke every delivery, isolating failures per callback.
///
/// A subscription cancelled by an earlier callback of the same commit is
/// skipped. Returns the number of callbacks that failed.
pub(crate) fn dispatch(
    deliveries: Vec<Delivery>,
    changes: &[KeyChange],
    snapshot_change: &SnapshotChange,
) -> usize {
    let mut failures = 0;
    for delivery in deliveries {
        match delivery {
            Delivery::Key {
                id,
                active,
                index,
                callback,
            } => {
                if !active.load(Ordering::SeqCst) {
                    continue;
                }
                let change = &changes[index];
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(change)));
                if !report(outcome, id, &change.key) {
                    failures += 1;
                }
            }
            Delivery::Wildcard {
                id,
                active,
                callback,
            } => {
                if !active.load(Ordering::SeqCst) {
                    continue;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot_change)));
                if !report(outcome, id, "*") {
                    failures += 1;
                }
            }
        }
    }
    failures
}

fn report(
    outcome: std::thread::Result<Result<(), CallbackError>>,
    id: SubscriptionId,
    key: &str,
) -> bool {
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::error!(subscription = %id, key = %key, error = %err, "state listener failed");
            false
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(subscription = %id, key = %key, panic = %msg, "state listener panicked");
            false
        }
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to
/// stop receiving notifications.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: SubscriptionId,
    topics: Vec<Topic>,
    store: Weak<Shared>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        topics: Vec<Topic>,
        active: Arc<AtomicBool>,
        store: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            topics,
            store,
            active,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove this callback from every key it was registered under.
    ///
    /// Takes effect immediately, including for a commit whose delivery is
    /// in progress. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id, &self.topics);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("active", &self.is_active())
            .finish()
    }
}
