//! Replicated Key-Value Store
//!
//! Append-only multi-map of key -> {value -> causal stamp} with a monotonic
//! version counter per key. Entries are never mutated or removed.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::VectorClock;
use crate::sync::CountingRwLock;

/// Values stored under one key, each with the clock it was written under.
pub type StampedValues = BTreeMap<String, VectorClock>;

/// Copy of (part of) a store: entries plus the version of each included key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub entries: BTreeMap<String, StampedValues>,
    pub versions: BTreeMap<String, u64>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|values| values.is_empty())
    }

    /// Total number of (key, value) pairs.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(|values| values.len()).sum()
    }

    /// Values stored under `key`, if any.
    pub fn values(&self, key: &str) -> Option<&StampedValues> {
        self.entries.get(key)
    }
}

/// Half-open range `(after, up_to]` over one clock component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampRange {
    pub after: u64,
    pub up_to: u64,
}

impl StampRange {
    pub fn new(after: u64, up_to: u64) -> Self {
        Self { after, up_to }
    }

    pub fn contains(&self, count: u64) -> bool {
        count > self.after && count <= self.up_to
    }
}

/// Result of a versioned search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The caller's version is current
    Unchanged { version: u64 },
    /// Every entry under the key, with the current version
    Changed { entries: StampedValues, version: u64 },
}

#[derive(Debug, Default)]
struct Tables {
    entries: HashMap<String, HashMap<String, VectorClock>>,
    versions: HashMap<String, u64>,
}

impl Tables {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Copy the entries accepted by `keep`, keyed, with their versions.
    fn collect<F>(&self, mut keep: F) -> StoreSnapshot
    where
        F: FnMut(&VectorClock) -> bool,
    {
        let mut snapshot = StoreSnapshot::default();
        for (key, values) in &self.entries {
            let kept: StampedValues = values
                .iter()
                .filter(|(_, stamp)| keep(stamp))
                .map(|(value, stamp)| (value.clone(), stamp.clone()))
                .collect();
            if kept.is_empty() {
                continue;
            }
            snapshot.versions.insert(key.clone(), self.version(key));
            snapshot.entries.insert(key.clone(), kept);
        }
        snapshot
    }
}

/// Thread-safe replicated store
#[derive(Debug, Clone)]
pub struct ReplicatedStore {
    inner: Arc<CountingRwLock<Tables>>,
}

impl Default for ReplicatedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedStore {
    /// Create a store with no reader cap
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CountingRwLock::new(Tables::default())),
        }
    }

    /// Create a store admitting at most `max_readers` concurrent readers
    pub fn with_max_readers(max_readers: usize) -> Self {
        Self {
            inner: Arc::new(CountingRwLock::with_max_readers(
                Tables::default(),
                max_readers,
            )),
        }
    }

    /// Append `value` under every key in `keys`, stamped with `stamp`.
    ///
    /// A value already present under a key keeps its original stamp. Returns
    /// the number of keys that received a new entry.
    pub fn write(&self, keys: &[String], value: &str, stamp: &VectorClock) -> usize {
        let mut tables = self.inner.write();
        let mut inserted = 0;
        for key in keys {
            let values = tables.entries.entry(key.clone()).or_default();
            if values.contains_key(value) {
                continue;
            }
            values.insert(value.to_string(), stamp.clone());
            *tables.versions.entry(key.clone()).or_insert(0) += 1;
            inserted += 1;
        }
        inserted
    }

    /// Fold replicated state in: absent values are inserted, versions are
    /// raised to the larger of local and incoming. Returns the number of
    /// entries inserted.
    pub fn merge(&self, incoming: &StoreSnapshot) -> usize {
        let mut tables = self.inner.write();
        let mut inserted = 0;
        for (key, values) in &incoming.entries {
            let local = tables.entries.entry(key.clone()).or_default();
            for (value, stamp) in values {
                if !local.contains_key(value) {
                    local.insert(value.clone(), stamp.clone());
                    inserted += 1;
                }
            }
        }
        for (key, version) in &incoming.versions {
            let local = tables.versions.entry(key.clone()).or_insert(0);
            *local = (*local).max(*version);
        }
        inserted
    }

    /// Look up `key` against the caller's known version (absent counts as 0).
    pub fn search(&self, key: &str, known_version: Option<u64>) -> SearchOutcome {
        let tables = self.inner.read();
        let version = tables.version(key);
        if known_version.unwrap_or(0) == version {
            return SearchOutcome::Unchanged { version };
        }

        let entries = tables
            .entries
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .map(|(value, stamp)| (value.clone(), stamp.clone()))
                    .collect()
            })
            .unwrap_or_default();
        SearchOutcome::Changed { entries, version }
    }

    /// Entries whose `reference` stamp component lies in `range`, or every
    /// entry when `range` is `None`.
    pub fn snapshot_between(&self, range: Option<StampRange>, reference: &str) -> StoreSnapshot {
        let tables = self.inner.read();
        match range {
            None => tables.collect(|_| true),
            Some(range) => tables.collect(|stamp| range.contains(stamp.count(reference))),
        }
    }

    /// Entries whose stamp precedes `upper_bound` ignoring the `ignore`
    /// component, or every entry without a bound.
    pub fn snapshot_before(&self, upper_bound: Option<&VectorClock>, ignore: &str) -> StoreSnapshot {
        let tables = self.inner.read();
        match upper_bound {
            None => tables.collect(|_| true),
            Some(bound) => tables.collect(|stamp| stamp.precedes(bound, Some(ignore))),
        }
    }

    /// Current version of `key`, 0 when never written.
    pub fn version(&self, key: &str) -> u64 {
        self.inner.read().version(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured reader cap
    pub fn max_readers(&self) -> Option<usize> {
        self.inner.max_readers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|(id, n)| (*id, *n)).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_write_then_search() {
        let store = ReplicatedStore::new();
        assert_eq!(store.search("x", None), SearchOutcome::Unchanged { version: 0 });

        store.write(&keys(&["x"]), "a", &clock(&[("n1", 1)]));

        match store.search("x", Some(0)) {
            SearchOutcome::Changed { entries, version } => {
                assert_eq!(version, 1);
                assert_eq!(entries.len(), 1);
                assert_eq!(entries["a"], clock(&[("n1", 1)]));
            }
            other => panic!("expected change, got {:?}", other),
        }
        assert_eq!(store.search("x", Some(1)), SearchOutcome::Unchanged { version: 1 });
    }

    #[test]
    fn test_write_multiple_keys() {
        let store = ReplicatedStore::new();
        let inserted = store.write(&keys(&["x", "y"]), "both", &clock(&[("n1", 1)]));
        assert_eq!(inserted, 2);
        assert_eq!(store.version("x"), 1);
        assert_eq!(store.version("y"), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_existing_stamp_is_kept() {
        let store = ReplicatedStore::new();
        store.write(&keys(&["x"]), "a", &clock(&[("n1", 1)]));
        let inserted = store.write(&keys(&["x"]), "a", &clock(&[("n1", 5)]));
        assert_eq!(inserted, 0);
        assert_eq!(store.version("x"), 1);

        let snapshot = store.snapshot_between(None, "n1");
        assert_eq!(snapshot.entries["x"]["a"], clock(&[("n1", 1)]));
    }

    #[test]
    fn test_version_never_below_local_writes() {
        let store = ReplicatedStore::new();
        for i in 0..5 {
            store.write(&keys(&["x"]), &format!("post{}", i), &clock(&[("n1", i + 1)]));
        }
        let mut incoming = StoreSnapshot::default();
        incoming.versions.insert("x".into(), 2);
        store.merge(&incoming);
        assert_eq!(store.version("x"), 5);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let source = ReplicatedStore::new();
        source.write(&keys(&["x"]), "a", &clock(&[("n1", 1)]));
        source.write(&keys(&["x", "y"]), "b", &clock(&[("n1", 2)]));
        let delta = source.snapshot_between(None, "n1");

        let target = ReplicatedStore::new();
        assert_eq!(target.merge(&delta), 3);
        let once = target.snapshot_between(None, "n1");
        assert_eq!(target.merge(&delta), 0);
        assert_eq!(target.snapshot_between(None, "n1"), once);
        assert_eq!(once, delta);
    }

    #[test]
    fn test_snapshot_between_range() {
        let store = ReplicatedStore::new();
        for i in 1..=4 {
            store.write(&keys(&["x"]), &format!("p{}", i), &clock(&[("n1", i), ("n2", 0)]));
        }
        store.write(&keys(&["y"]), "other", &clock(&[("n1", 0), ("n2", 1)]));

        let delta = store.snapshot_between(Some(StampRange::new(1, 3)), "n1");
        let values: Vec<_> = delta.entries["x"].keys().cloned().collect();
        assert_eq!(values, vec!["p2", "p3"]);
        assert!(!delta.entries.contains_key("y"));
        assert_eq!(delta.versions.get("x"), Some(&4));
        assert_eq!(delta.entry_count(), 2);

        let none = store.snapshot_between(Some(StampRange::new(4, 9)), "n1");
        assert!(none.is_empty());
    }

    #[test]
    fn test_snapshot_before_bound() {
        let store = ReplicatedStore::new();
        store.write(&keys(&["x"]), "early", &clock(&[("n1", 1), ("n2", 1)]));
        store.write(&keys(&["x"]), "late", &clock(&[("n1", 3), ("n2", 1)]));
        store.write(&keys(&["x"]), "own", &clock(&[("n1", 1), ("n2", 7)]));

        let bound = clock(&[("n1", 2), ("n2", 1)]);
        let snapshot = store.snapshot_before(Some(&bound), "n2");
        let values: Vec<_> = snapshot.entries["x"].keys().cloned().collect();
        assert_eq!(values, vec!["early", "own"]);

        let all = store.snapshot_before(None, "n2");
        assert_eq!(all.entry_count(), 3);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = ReplicatedStore::with_max_readers(3);
        assert_eq!(store.max_readers(), Some(3));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let stamp = clock(&[("n1", i)]);
                        store.write(&["x".to_string()], &format!("t{}-{}", t, i), &stamp);
                        store.search("x", Some(0));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.version("x"), 200);
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::btree_map("n[1-3]", 0u64..6, 0..4)
            .prop_map(|counters| counters.into_iter().collect())
    }

    fn arb_snapshot() -> impl Strategy<Value = StoreSnapshot> {
        (
            prop::collection::btree_map(
                "[a-c]",
                prop::collection::btree_map("p[0-5]", arb_clock(), 1..4),
                0..4,
            ),
            prop::collection::btree_map("[a-c]", 0u64..6, 0..4),
        )
            .prop_map(|(entries, versions)| StoreSnapshot { entries, versions })
    }

    proptest! {
        #[test]
        fn test_merge_idempotent_for_any_snapshot(
            existing in arb_snapshot(),
            incoming in arb_snapshot(),
        ) {
            let store = ReplicatedStore::new();
            store.merge(&existing);

            store.merge(&incoming);
            let once = store.snapshot_between(None, "n1");
            prop_assert_eq!(store.merge(&incoming), 0);
            prop_assert_eq!(store.snapshot_between(None, "n1"), once.clone());

            for (key, version) in &incoming.versions {
                prop_assert!(store.version(key) >= *version);
            }
            for (key, values) in &incoming.entries {
                for value in values.keys() {
                    prop_assert!(once.entries[key].contains_key(value));
                }
            }
        }
    }
}
