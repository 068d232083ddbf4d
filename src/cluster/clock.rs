//! Vector Clocks
//!
//! `VectorClock` is the plain causal timestamp that travels on the wire and
//! stamps stored entries. `NodeClock` is the one instance a node owns: it
//! guards its clock with a [`CountingRwLock`] and lets readers wait for a
//! component to catch up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;

use super::node::NodeId;
use crate::error::{Error, Result};
use crate::sync::CountingRwLock;

/// Causal timestamp: node id -> counter. Absent components read as zero in
/// every comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<NodeId, u64>,
}

/// A peer the local clock lags behind, as reported by [`VectorClock::outdated_peers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedPeer {
    pub node_id: NodeId,
    /// Count claimed by the target clock
    pub target: u64,
    /// Count known locally (zero when absent)
    pub local: u64,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock with a zero component for every given id.
    pub fn seeded<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let mut clock = Self::new();
        clock.fill_missing(ids);
        clock
    }

    /// Set one component, ignoring monotonicity. Meant for building clocks.
    pub fn with(mut self, node_id: impl Into<NodeId>, count: u64) -> Self {
        self.counters.insert(node_id.into(), count);
        self
    }

    pub fn get(&self, node_id: &str) -> Option<u64> {
        self.counters.get(node_id).copied()
    }

    /// Component value with absent read as zero.
    pub fn count(&self, node_id: &str) -> u64 {
        self.get(node_id).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.counters.iter().map(|(id, count)| (id, *count))
    }

    /// Raise `node_id`'s own counter by one. The component must already exist.
    pub fn increment_own(&mut self, node_id: &str) -> Result<u64> {
        let counter = self
            .counters
            .get_mut(node_id)
            .ok_or_else(|| Error::UnknownClockComponent(node_id.to_string()))?;
        *counter += 1;
        Ok(*counter)
    }

    /// Raise one component to at least `count`.
    pub fn observe(&mut self, node_id: &str, count: u64) {
        match self.counters.get_mut(node_id) {
            Some(current) => *current = (*current).max(count),
            None => {
                self.counters.insert(node_id.to_string(), count);
            }
        }
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node_id, count) in other.iter() {
            self.observe(node_id, count);
        }
    }

    /// True iff every component of `self`, except `ignore`, is <= the same
    /// component of `other`. Concurrent clocks are false in both directions.
    pub fn precedes(&self, other: &VectorClock, ignore: Option<&str>) -> bool {
        self.iter()
            .filter(|(node_id, _)| Some(node_id.as_str()) != ignore)
            .all(|(node_id, count)| count <= other.count(node_id))
    }

    /// Components of `target` (except `ignore`) that are positive and ahead
    /// of this clock, least stale first.
    pub fn outdated_peers(&self, target: &VectorClock, ignore: &str) -> Vec<OutdatedPeer> {
        let mut outdated: Vec<OutdatedPeer> = target
            .iter()
            .filter(|(node_id, _)| node_id.as_str() != ignore)
            .filter(|(node_id, count)| *count > 0 && *count > self.count(node_id))
            .map(|(node_id, count)| OutdatedPeer {
                node_id: node_id.clone(),
                target: count,
                local: self.count(node_id),
            })
            .collect();
        outdated.sort_by_key(|peer| peer.target);
        outdated
    }

    /// Seed a zero component for every id not yet present.
    pub fn fill_missing<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        for id in ids {
            self.counters.entry(id.into()).or_insert(0);
        }
    }

    /// Sum of all components; strictly grows along causal order, which makes
    /// it a usable sort key for a linear extension of that order.
    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (node_id, count)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", node_id, count)?;
        }
        write!(f, "}}")
    }
}

impl<S: Into<NodeId>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            counters: iter.into_iter().map(|(id, n)| (id.into(), n)).collect(),
        }
    }
}

/// The clock a node owns for its whole lifetime.
#[derive(Debug)]
pub struct NodeClock {
    owner: NodeId,
    clock: CountingRwLock<VectorClock>,
    advanced: Notify,
}

impl NodeClock {
    /// Create the clock of `owner`, seeding a zero for every id in `seeds`.
    pub fn new<I, S>(owner: impl Into<NodeId>, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self {
            owner: owner.into(),
            clock: CountingRwLock::new(VectorClock::seeded(seeds)),
            advanced: Notify::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn get(&self, node_id: &str) -> Option<u64> {
        self.clock.read().get(node_id)
    }

    /// Component value with absent read as zero.
    pub fn count(&self, node_id: &str) -> u64 {
        self.clock.read().count(node_id)
    }

    /// This node's own component, zero if unseeded.
    pub fn own(&self) -> u64 {
        self.count(&self.owner)
    }

    /// Copy of the current clock.
    pub fn snapshot(&self) -> VectorClock {
        self.clock.read().clone()
    }

    /// Increment the own component and return the resulting clock.
    pub fn tick(&self) -> Result<VectorClock> {
        let stamp = {
            let mut clock = self.clock.write();
            clock.increment_own(&self.owner)?;
            clock.clone()
        };
        self.advanced.notify_waiters();
        Ok(stamp)
    }

    /// Raise `origin`'s component to `count`, then increment the own
    /// component, returning the resulting clock.
    pub fn absorb_and_tick(&self, origin: &str, count: u64) -> Result<VectorClock> {
        let stamp = {
            let mut clock = self.clock.write();
            clock.observe(origin, count);
            clock.increment_own(&self.owner)?;
            clock.clone()
        };
        self.advanced.notify_waiters();
        Ok(stamp)
    }

    /// Raise one component to at least `count`.
    pub fn observe(&self, node_id: &str, count: u64) {
        self.clock.write().observe(node_id, count);
        self.advanced.notify_waiters();
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&self, other: &VectorClock) {
        self.clock.write().merge(other);
        self.advanced.notify_waiters();
    }

    pub fn fill_missing<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.clock.write().fill_missing(ids);
    }

    /// Peers `target` claims to be ahead on, ignoring this node's own component.
    pub fn outdated_peers(&self, target: &VectorClock) -> Vec<OutdatedPeer> {
        self.clock.read().outdated_peers(target, &self.owner)
    }

    /// Wait until `ready` holds for the clock. The condition is re-checked
    /// on every clock mutation and at least once per `poll`.
    pub async fn wait_until<F>(&self, poll: Duration, mut ready: F)
    where
        F: FnMut(&VectorClock) -> bool,
    {
        loop {
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = ready(&self.clock.read());
            if done {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready, task};

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|(id, n)| (*id, *n)).collect()
    }

    #[test]
    fn test_merge_is_commutative_associative_idempotent() {
        let a = clock(&[("n1", 3), ("n2", 0)]);
        let b = clock(&[("n2", 4), ("n3", 1)]);
        let c = clock(&[("n1", 1), ("n3", 7)]);

        let mut abc = a.clone();
        abc.merge(&b);
        abc.merge(&c);

        let mut acb = a.clone();
        acb.merge(&c);
        acb.merge(&b);
        assert_eq!(abc, acb);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);
        assert_eq!(abc, a_bc);

        let mut again = abc.clone();
        again.merge(&abc);
        assert_eq!(again, abc);
        assert_eq!(abc, clock(&[("n1", 3), ("n2", 4), ("n3", 7)]));
    }

    #[test]
    fn test_merge_dominates_inputs() {
        let a = clock(&[("n1", 2)]);
        let b = clock(&[("n2", 5)]);
        let mut merged = a.clone();
        merged.merge(&b);
        assert!(a.precedes(&merged, None));
        assert!(b.precedes(&merged, None));
    }

    #[test]
    fn test_precedes_is_reflexive() {
        let a = clock(&[("n1", 2), ("n2", 9)]);
        assert!(a.precedes(&a, None));
        assert!(VectorClock::new().precedes(&VectorClock::new(), None));
    }

    #[test]
    fn test_precedes_treats_missing_as_zero() {
        let a = clock(&[("n1", 1), ("n2", 0)]);
        let b = clock(&[("n1", 1)]);
        assert!(a.precedes(&b, None));

        let c = clock(&[("n1", 1), ("n3", 2)]);
        assert!(!c.precedes(&b, None));
        assert!(c.precedes(&b, Some("n3")));
    }

    #[test]
    fn test_concurrent_clocks_precede_neither_way() {
        let a = clock(&[("n1", 2), ("n2", 0)]);
        let b = clock(&[("n1", 0), ("n2", 2)]);
        assert!(!a.precedes(&b, None));
        assert!(!b.precedes(&a, None));
    }

    #[test]
    fn test_mutual_precedence_means_equal_components() {
        let a = clock(&[("n1", 2), ("n2", 5)]);
        let b = clock(&[("n2", 5), ("n1", 2)]);
        assert!(a.precedes(&b, None) && b.precedes(&a, None));
        for (id, count) in a.iter() {
            assert_eq!(b.get(id), Some(count));
        }
    }

    #[test]
    fn test_increment_requires_seed() {
        let mut c = VectorClock::seeded(["n1"]);
        assert_eq!(c.increment_own("n1").unwrap(), 1);
        assert!(matches!(
            c.increment_own("n2"),
            Err(Error::UnknownClockComponent(id)) if id == "n2"
        ));
    }

    #[test]
    fn test_outdated_peers_sorted_and_resolved_by_catch_up() {
        let mut local = clock(&[("n1", 2), ("n2", 0)]);
        let remote = clock(&[("n1", 3)]);

        let outdated = local.outdated_peers(&remote, "n2");
        assert_eq!(
            outdated,
            vec![OutdatedPeer { node_id: "n1".into(), target: 3, local: 2 }]
        );

        local.observe("n1", 3);
        assert!(local.outdated_peers(&remote, "n2").is_empty());
    }

    #[test]
    fn test_outdated_peers_ignores_self_and_zero() {
        let local = clock(&[("n1", 0)]);
        let remote = clock(&[("n1", 9), ("n2", 0), ("n3", 4), ("n4", 2)]);
        let outdated = local.outdated_peers(&remote, "n1");
        let ids: Vec<_> = outdated.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(ids, vec!["n4", "n3"]);
        assert_eq!(outdated[0].local, 0);
    }

    #[test]
    fn test_fill_missing_keeps_existing() {
        let mut c = clock(&[("n1", 4)]);
        c.fill_missing(["n1", "n2"]);
        assert_eq!(c, clock(&[("n1", 4), ("n2", 0)]));
    }

    #[test]
    fn test_serde_is_a_plain_map() {
        let c = clock(&[("store1", 2)]);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"store1":2}"#);
        assert_eq!(c.to_string(), "{store1:2}");
    }

    #[test]
    fn test_node_clock_tick_returns_stamp() {
        let node = NodeClock::new("n1", ["n1"]);
        assert_eq!(node.tick().unwrap(), clock(&[("n1", 1)]));
        let stamp = node.absorb_and_tick("n2", 5).unwrap();
        assert_eq!(stamp, clock(&[("n1", 2), ("n2", 5)]));
        node.observe("n2", 3);
        assert_eq!(node.get("n2"), Some(5));
        assert_eq!(node.own(), 2);
    }

    #[test]
    fn test_unseeded_node_clock_cannot_tick() {
        let node = NodeClock::new("edge1", Vec::<String>::new());
        assert!(node.tick().is_err());
    }

    #[tokio::test]
    async fn test_wait_until_wakes_on_advance() {
        let node = Arc::new(NodeClock::new("n1", ["n1", "n2"]));
        let waiter = node.clone();
        let mut wait = task::spawn(async move {
            waiter
                .wait_until(Duration::from_secs(60), |c| c.count("n2") >= 2)
                .await
        });

        assert_pending!(wait.poll());
        node.observe("n2", 1);
        assert!(wait.is_woken());
        assert_pending!(wait.poll());
        node.observe("n2", 2);
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::btree_map("n[1-4]", 0u64..8, 0..5)
            .prop_map(|counters| counters.into_iter().collect())
    }

    fn merged(a: &VectorClock, b: &VectorClock) -> VectorClock {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    proptest! {
        #[test]
        fn test_merge_laws(a in arb_clock(), b in arb_clock(), c in arb_clock()) {
            prop_assert_eq!(merged(&a, &b), merged(&b, &a));
            prop_assert_eq!(merged(&merged(&a, &b), &c), merged(&a, &merged(&b, &c)));
            prop_assert_eq!(merged(&a, &a), a.clone());

            let ab = merged(&a, &b);
            prop_assert!(a.precedes(&ab, None));
            prop_assert!(b.precedes(&ab, None));
        }

        #[test]
        fn test_precedes_reflexive_for_any_clock(a in arb_clock()) {
            prop_assert!(a.precedes(&a, None));
        }

        #[test]
        fn test_mutual_precedence_for_any_clocks(a in arb_clock(), b in arb_clock()) {
            if a.precedes(&b, None) && b.precedes(&a, None) {
                for (id, _) in a.iter().chain(b.iter()) {
                    prop_assert_eq!(a.count(id), b.count(id));
                }
            }
        }

        #[test]
        fn test_equal_counts_precede_both_ways(a in arb_clock()) {
            // Same counts plus explicit zeros.
            let mut b = a.clone();
            b.fill_missing(["n1", "n2", "n3", "n4"]);
            prop_assert!(a.precedes(&b, None));
            prop_assert!(b.precedes(&a, None));
        }
    }
}
