use crate::value::StateValue;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

/// One committed change set.
///
/// Only the keys that changed are recorded. A `None` value means the key was
/// absent on that side of the commit.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub changed_keys: Vec<String>,
    pub previous: BTreeMap<String, Option<StateValue>>,
    pub current: BTreeMap<String, Option<StateValue>>,
}

impl HistoryEntry {
    pub fn touches(&self, key: &str) -> bool {
        self.changed_keys.iter().any(|k| k == key)
    }
}

/// Append-only change log that keeps the most recent `capacity` entries.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_sequence: 1,
        }
    }

    /// Record a commit and return its sequence number, evicting the oldest
    /// entry once the bound is exceeded.
    pub fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        changed_keys: Vec<String>,
        previous: BTreeMap<String, Option<StateValue>>,
        current: BTreeMap<String, Option<StateValue>>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(HistoryEntry {
            sequence,
            timestamp,
            changed_keys,
            previous,
            current,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        sequence
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
