use crate::computed::Computed;
use crate::config::StoreConfig;
use crate::error::{CallbackError, PersistError, PersistenceFailure, StoreError};
use crate::history::{History, HistoryEntry};
use crate::persist::{MemoryStorage, StorageBackend};
use crate::subscription::{
    dispatch, Delivery, KeyChange, Listener, Registry, SnapshotChange, Subscription,
    SubscriptionId, Topic,
};
use crate::value::{self, Keys, Patch, Snapshot, StateValue, Update};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Snapshot key holding the RFC 3339 time of the last commit.
pub const LAST_UPDATED_KEY: &str = "lastUpdated";

/// Key spelling that means "every commit" in the original string-keyed API.
pub const WILDCARD: &str = "*";

/// Outcome of a commit.
///
/// A commit that changed nothing, and every write made inside a batch that
/// has not yet been flushed, yields an empty report.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub sequence: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub changed_keys: Vec<String>,
    /// Persistent keys whose new value did not reach storage. The in-memory
    /// state already holds the new value.
    pub persistence_failures: Vec<PersistenceFailure>,
    /// Callbacks that failed while this commit was delivered. Zero when
    /// the delivery was left to a call already delivering earlier commits.
    pub listener_failures: usize,
}

impl CommitReport {
    pub fn is_noop(&self) -> bool {
        self.sequence.is_none()
    }

    pub fn is_durable(&self) -> bool {
        self.persistence_failures.is_empty()
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub state_keys: usize,
    pub subscriptions: usize,
    pub history_len: usize,
    pub persistent_keys: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Serializes commits across threads.
///
/// The owning thread may enter again, which is how writes inside a batch
/// and nested batches get through.
#[derive(Default)]
struct CommitGate {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl CommitGate {
    fn enter(&self) -> GateGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        while !Self::try_enter(&mut owner, me) {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        GateGuard { gate: self }
    }

    fn try_enter(slot: &mut Option<(ThreadId, usize)>, me: ThreadId) -> bool {
        match slot {
            None => {
                *slot = Some((me, 1));
                true
            }
            Some((owner, depth)) if *owner == me => {
                *depth += 1;
                true
            }
            Some(_) => false,
        }
    }
}

struct GateGuard<'a> {
    gate: &'a CommitGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self
            .gate
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.gate.released.notify_one();
            }
        }
    }
}

struct PendingBatch {
    base: Arc<Snapshot>,
    touched: Vec<String>,
    forced: BTreeSet<String>,
}

impl PendingBatch {
    fn new(base: Arc<Snapshot>) -> Self {
        Self {
            base,
            touched: Vec::new(),
            forced: BTreeSet::new(),
        }
    }

    fn touch(&mut self, keys: &[String], forced: bool) {
        for key in keys {
            if !self.touched.contains(key) {
                self.touched.push(key.clone());
            }
            if forced {
                self.forced.insert(key.clone());
            }
        }
    }
}

struct StoreState {
    snapshot: Arc<Snapshot>,
    registry: Registry,
    history: History,
    last_updated: Option<DateTime<Utc>>,
    batch_depth: usize,
    pending: Option<PendingBatch>,
    /// Set while some call is draining `queued`.
    delivering: bool,
    /// Persisted commits waiting to be delivered, in commit order.
    queued: VecDeque<Notification>,
}

pub(crate) struct Shared {
    state: Mutex<StoreState>,
    gate: CommitGate,
    storage: Arc<dyn StorageBackend>,
    config: StoreConfig,
    defaults: Arc<Snapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId, topics: &[Topic]) {
        if self.lock().registry.remove(id, topics) {
            tracing::debug!(subscription = %id, ?topics, "unsubscribed from state changes");
        }
    }
}

enum Mutation {
    Merge(Patch),
    Replace(Snapshot),
}

struct CommitPlan {
    sequence: u64,
    persist: Vec<(String, Option<StateValue>)>,
    notification: Notification,
}

struct Notification {
    sequence: u64,
    timestamp: DateTime<Utc>,
    changes: Vec<KeyChange>,
    snapshot_change: SnapshotChange,
    deliveries: Vec<Delivery>,
}

fn check_keys(patch: &Patch) -> Result<(), StoreError> {
    match patch.keys().find(|key| key.is_empty() || key.contains('.')) {
        Some(bad) => Err(StoreError::InvalidKey(bad.to_string())),
        None => Ok(()),
    }
}

/// A keyed reactive state container.
///
/// `Store` is a cheap handle: clones share the same state, subscribers,
/// history and storage. Construct one at startup and pass it to every
/// collaborator that reads or writes state.
///
/// Every method runs to completion before returning. Commits from several
/// threads are applied one at a time, in the order they acquire the store,
/// and subscribers see them in that same order. The internal locks are
/// released before subscribers or computed functions run, so they may call
/// back into the store.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open a store seeded with `defaults`, overlaying any values previously
    /// persisted for the configured persistent keys.
    ///
    /// Records that are missing, unreadable or unparseable leave the default
    /// in place.
    pub fn open(
        config: StoreConfig,
        defaults: Snapshot,
        storage: impl StorageBackend + 'static,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self::build(config, defaults, Arc::new(storage)))
    }

    /// A store with default config and no durable storage.
    pub fn in_memory(defaults: Snapshot) -> Self {
        Self::build(
            StoreConfig::default(),
            defaults,
            Arc::new(MemoryStorage::new()),
        )
    }

    fn build(config: StoreConfig, defaults: Snapshot, storage: Arc<dyn StorageBackend>) -> Self {
        let mut initial = defaults.clone();
        for key in &config.persistent_keys {
            match storage.read(&config.record_name(key)) {
                Ok(Some(text)) => match StateValue::from_json_str(&text) {
                    Ok(value) => {
                        tracing::debug!(key = %key, "loaded persisted state");
                        initial.insert(key.clone(), value);
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "ignoring unparseable persisted state");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to load persisted state");
                }
            }
        }

        let state = StoreState {
            snapshot: Arc::new(initial),
            registry: Registry::default(),
            history: History::new(config.max_history),
            last_updated: None,
            batch_depth: 0,
            pending: None,
            delivering: false,
            queued: VecDeque::new(),
        };
        let store = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                gate: CommitGate::default(),
                storage,
                config,
                defaults: Arc::new(defaults),
            }),
        };

        if store.shared.config.log_changes {
            store.subscribe_all(|change| {
                tracing::debug!(
                    changed = ?change.changed_keys,
                    keys = change.new.len(),
                    "state change"
                );
                Ok(())
            });
        }
        tracing::debug!(
            namespace = %store.shared.config.namespace,
            persistent = store.shared.config.persistent_keys.len(),
            "state store initialized"
        );
        store
    }

    /// The whole current snapshot.
    ///
    /// The returned snapshot is never modified; later commits publish a new
    /// one.
    pub fn get_state(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.lock().snapshot)
    }

    /// Value at a dot-separated path such as `"userPreferences.theme"`.
    pub fn get(&self, key: &str) -> Result<Option<StateValue>, StoreError> {
        value::lookup(&self.get_state(), key)
    }

    /// Read state without cloning it.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Snapshot) -> R,
    {
        f(&self.get_state())
    }

    /// Shallow-merge an update into the state.
    ///
    /// Steps, in order: swap the snapshot, append a history entry for the
    /// changed keys, write changed persistent keys to storage, notify
    /// subscribers, stamp `lastUpdated`. Inside [`Store::batch`] only the
    /// first step happens here; the rest run once when the batch ends.
    ///
    /// An updater function runs while other writers are held off, so it
    /// must not write to the store itself. Keys must be non-empty and
    /// must not contain `.`, which is the path separator of [`Store::get`].
    ///
    /// A commit made while another one is being delivered, for example from
    /// inside a subscriber, is delivered after it.
    pub fn set_state(&self, update: impl Into<Update>) -> Result<CommitReport, StoreError> {
        let committed = {
            let _gate = self.shared.gate.enter();
            let patch = update.into().resolve(&self.get_state());
            check_keys(&patch)?;
            self.commit(Mutation::Merge(patch))
        };
        Ok(self.publish(committed))
    }

    /// Coalesce every `set_state` made by `updater` into one commit.
    ///
    /// Writes from other threads wait until the batch ends. Nested batches
    /// fold into the outermost one. If `updater` returns an error or panics,
    /// the writes it already made are still committed, then the error is
    /// returned or the panic resumes.
    pub fn batch<F>(&self, updater: F) -> Result<CommitReport, StoreError>
    where
        F: FnOnce(&Store) -> Result<(), StoreError>,
    {
        let gate = self.shared.gate.enter();
        {
            let mut state = self.shared.lock();
            state.batch_depth += 1;
            if state.batch_depth == 1 {
                let base = Arc::clone(&state.snapshot);
                state.pending = Some(PendingBatch::new(base));
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| updater(self)));

        let plan = {
            let mut state = self.shared.lock();
            state.batch_depth -= 1;
            if state.batch_depth > 0 {
                None
            } else {
                match state.pending.take() {
                    Some(pending) => {
                        let new = Arc::clone(&state.snapshot);
                        self.plan_commit(
                            &mut state,
                            pending.base,
                            new,
                            &pending.touched,
                            &pending.forced,
                        )
                    }
                    None => None,
                }
            }
        };
        let committed = plan.map(|plan| self.persist(plan));
        drop(gate);
        let report = self.publish(committed);

        match outcome {
            Ok(Ok(())) => Ok(report),
            Ok(Err(e)) => Err(e),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Replace the entire state with fresh defaults, notifying every
    /// subscriber as if every key changed.
    pub fn reset_state(&self) -> CommitReport {
        tracing::debug!("resetting all state");
        let committed = {
            let _gate = self.shared.gate.enter();
            self.commit(Mutation::Replace(Snapshot::clone(&self.shared.defaults)))
        };
        self.publish(committed)
    }

    /// Reset only `keys` to their defaults through the normal update path.
    ///
    /// Keys without a default are removed.
    pub fn reset_keys(&self, keys: impl Into<Keys>) -> Result<CommitReport, StoreError> {
        let keys = keys.into().dedup();
        if let Some(bad) = keys.iter().find(|k| k.is_empty()) {
            return Err(StoreError::InvalidKey(bad.clone()));
        }
        let mut patch = Patch::new();
        for key in keys {
            match self.shared.defaults.get(&key) {
                Some(default) => patch.insert(key, default.clone()),
                None => patch.remove(key),
            }
        }
        tracing::debug!(keys = ?patch.keys().collect::<Vec<_>>(), "resetting state keys");
        self.set_state(patch)
    }

    /// Call `callback` once per commit that changes any of `keys`, once for
    /// each matching key.
    ///
    /// The wildcard key `"*"` is not accepted here because wildcard
    /// listeners receive whole snapshots; register them with
    /// [`Store::subscribe_all`].
    pub fn subscribe<F>(&self, keys: impl Into<Keys>, callback: F) -> Result<Subscription, StoreError>
    where
        F: Fn(&KeyChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let keys = keys.into();
        if keys.is_empty() {
            return Err(StoreError::InvalidArgument(
                "subscribe needs at least one key".into(),
            ));
        }
        for key in keys.as_slice() {
            if key.is_empty() {
                return Err(StoreError::InvalidKey(key.clone()));
            }
            if key == WILDCARD {
                return Err(StoreError::InvalidArgument(
                    "use subscribe_all to listen to every commit".into(),
                ));
            }
        }
        let topics: Vec<Topic> = keys.dedup().into_iter().map(Topic::Key).collect();
        Ok(self.register(topics, Listener::Key(Arc::new(callback))))
    }

    /// Call `callback` once per commit with both snapshots and the changed
    /// keys. This is the `"*"` subscription.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SnapshotChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.register(vec![Topic::Wildcard], Listener::Wildcard(Arc::new(callback)))
    }

    fn register(&self, topics: Vec<Topic>, listener: Listener) -> Subscription {
        let (id, active) = self.shared.lock().registry.add(&topics, listener);
        tracing::debug!(subscription = %id, ?topics, "subscribed to state changes");
        Subscription::new(id, topics, active, Arc::downgrade(&self.shared))
    }

    /// A memoized value derived from the snapshot, recomputed only when one
    /// of `dependencies` changes.
    ///
    /// `compute` must be a pure function of the snapshot.
    pub fn create_computed<T, F>(
        &self,
        compute: F,
        dependencies: impl Into<Keys>,
    ) -> Result<Computed<T>, StoreError>
    where
        T: Clone + Send + 'static,
        F: Fn(&Snapshot) -> T + Send + Sync + 'static,
    {
        let dependencies = dependencies.into().dedup();
        for key in &dependencies {
            value::segments(key)?;
        }
        Ok(Computed::new(self.clone(), dependencies, compute))
    }

    /// The most recent `limit` history entries, oldest first. `None` uses
    /// the configured default limit.
    pub fn get_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let limit = limit.unwrap_or(self.shared.config.default_history_limit);
        self.shared.lock().history.recent(limit)
    }

    pub fn get_stats(&self) -> StoreStats {
        let state = self.shared.lock();
        StoreStats {
            state_keys: state.snapshot.len(),
            subscriptions: state.registry.len(),
            history_len: state.history.len(),
            persistent_keys: self.shared.config.persistent_keys.len(),
            last_updated: state.last_updated,
        }
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_updated
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn defaults(&self) -> &Snapshot {
        &self.shared.defaults
    }

    /// Delete persisted records for `keys`, or for every persistent key.
    ///
    /// In-memory state is untouched.
    pub fn clear_persisted(&self, keys: Option<&[&str]>) -> Vec<PersistenceFailure> {
        let keys: Vec<String> = match keys {
            Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
            None => self.shared.config.persistent_keys.clone(),
        };
        let _gate = self.shared.gate.enter();
        let mut failures = Vec::new();
        for key in keys {
            let name = self.shared.config.record_name(&key);
            match self.shared.storage.remove(&name) {
                Ok(()) => tracing::debug!(key = %key, "cleared persisted state"),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to clear persisted state");
                    failures.push(PersistenceFailure {
                        key,
                        error: PersistError::Storage(e),
                    });
                }
            }
        }
        failures
    }

    /// Apply a mutation, persist it and queue its notification. Caller holds
    /// the commit gate.
    fn commit(&self, mutation: Mutation) -> Option<CommitReport> {
        let plan = {
            let mut state = self.shared.lock();
            let old = Arc::clone(&state.snapshot);
            let (next, touched, forced) = match mutation {
                Mutation::Merge(patch) => {
                    let touched: Vec<String> = patch.keys().map(str::to_string).collect();
                    (patch.apply_to(&old), touched, false)
                }
                Mutation::Replace(next) => {
                    let all: BTreeSet<String> = old.keys().chain(next.keys()).cloned().collect();
                    (next, all.into_iter().collect(), true)
                }
            };
            state.snapshot = Arc::new(next);

            if let Some(pending) = state.pending.as_mut() {
                pending.touch(&touched, forced);
                return None;
            }

            let forced: BTreeSet<String> = if forced {
                touched.iter().cloned().collect()
            } else {
                BTreeSet::new()
            };
            let new = Arc::clone(&state.snapshot);
            self.plan_commit(&mut state, old, new, &touched, &forced)
        };
        plan.map(|plan| self.persist(plan))
    }

    /// Record history and collect persistence and notification work for a
    /// commit from `old` to `new`. Runs under the state lock.
    fn plan_commit(
        &self,
        state: &mut StoreState,
        old: Arc<Snapshot>,
        new: Arc<Snapshot>,
        touched: &[String],
        forced: &BTreeSet<String>,
    ) -> Option<CommitPlan> {
        let changes: Vec<KeyChange> = touched
            .iter()
            .filter(|key| {
                forced.contains(*key)
                    || (key.as_str() != LAST_UPDATED_KEY && old.get(*key) != new.get(*key))
            })
            .map(|key| KeyChange {
                key: key.clone(),
                new: new.get(key).cloned(),
                old: old.get(key).cloned(),
            })
            .collect();
        if changes.is_empty() {
            return None;
        }

        let timestamp = Utc::now();
        let changed_keys: Vec<String> = changes.iter().map(|c| c.key.clone()).collect();
        let previous = changes
            .iter()
            .map(|c| (c.key.clone(), c.old.clone()))
            .collect();
        let current = changes
            .iter()
            .map(|c| (c.key.clone(), c.new.clone()))
            .collect();
        let sequence = state
            .history
            .record(timestamp, changed_keys.clone(), previous, current);

        let persist = changes
            .iter()
            .filter(|c| self.shared.config.is_persistent(&c.key))
            .map(|c| (c.key.clone(), c.new.clone()))
            .collect();
        let deliveries = state.registry.plan(&changes, true);

        Some(CommitPlan {
            sequence,
            persist,
            notification: Notification {
                sequence,
                timestamp,
                changes,
                snapshot_change: SnapshotChange {
                    new,
                    old,
                    changed_keys,
                },
                deliveries,
            },
        })
    }

    /// Write the changed persistent keys of a planned commit, then queue its
    /// notification. Caller holds the commit gate, so records reach storage
    /// and notifications reach the queue in commit order.
    fn persist(&self, plan: CommitPlan) -> CommitReport {
        let CommitPlan {
            sequence,
            persist,
            notification,
        } = plan;

        let mut persistence_failures = Vec::new();
        for (key, value) in persist {
            match self.persist_one(&key, value.as_ref()) {
                Ok(()) => tracing::debug!(key = %key, "persisted state"),
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "failed to persist state");
                    persistence_failures.push(PersistenceFailure { key, error });
                }
            }
        }

        let changed_keys = notification.snapshot_change.changed_keys.clone();
        let timestamp = notification.timestamp;
        self.shared.lock().queued.push_back(notification);
        tracing::debug!(sequence, changed = ?changed_keys, "state updated");
        CommitReport {
            sequence: Some(sequence),
            timestamp: Some(timestamp),
            changed_keys,
            persistence_failures,
            listener_failures: 0,
        }
    }

    fn persist_one(&self, key: &str, value: Option<&StateValue>) -> Result<(), PersistError> {
        let name = self.shared.config.record_name(key);
        match value {
            Some(value) => {
                let text = value.to_json_string()?;
                self.shared.storage.write(&name, &text)?;
            }
            None => self.shared.storage.remove(&name)?,
        }
        Ok(())
    }

    /// Deliver queued commits. Runs without the commit gate.
    fn publish(&self, report: Option<CommitReport>) -> CommitReport {
        match report {
            Some(mut report) => {
                if let Some(sequence) = report.sequence {
                    report.listener_failures = self.deliver_queued(sequence);
                }
                report
            }
            None => CommitReport::default(),
        }
    }

    /// Notify subscribers and stamp `lastUpdated`, one queued commit at a
    /// time, until the queue is empty.
    ///
    /// If another call is already draining the queue (further up this
    /// thread's stack, or on another thread) it delivers everything and this
    /// returns at once. Returns the number of failed callbacks for commit
    /// `sequence` if this call delivered it.
    fn deliver_queued(&self, sequence: u64) -> usize {
        let mut next = {
            let mut state = self.shared.lock();
            if state.delivering {
                return 0;
            }
            let next = state.queued.pop_front();
            state.delivering = next.is_some();
            next
        };

        let mut own_failures = 0;
        while let Some(notification) = next {
            let failures = dispatch(
                notification.deliveries,
                &notification.changes,
                &notification.snapshot_change,
            );
            if notification.sequence == sequence {
                own_failures = failures;
            }

            let mut state = self.shared.lock();
            let timestamp = notification.timestamp;
            if state.last_updated.map_or(true, |t| t < timestamp) {
                state.last_updated = Some(timestamp);
                Arc::make_mut(&mut state.snapshot).insert(
                    LAST_UPDATED_KEY.to_string(),
                    StateValue::from(json!(timestamp.to_rfc3339())),
                );
            }
            next = state.queued.pop_front();
            if next.is_none() {
                state.delivering = false;
            }
        }
        own_failures
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.shared.config.namespace)
            .field("stats", &self.get_stats())
            .finish()
    }
}
