//! Membership Directory
//!
//! Node id -> location, or a tombstone for a node known to be down. Entries
//! are never removed. Merging is last-writer-wins and, unlike store writes,
//! carries no causal ordering.

use std::collections::BTreeMap;
use tracing::debug;

use super::node::{instance_of, NodeId, Tier};
use crate::sync::CountingRwLock;

/// Wire form of a directory: `None` marks a tombstone.
pub type Servers = BTreeMap<NodeId, Option<String>>;

/// What the directory knows about one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Up(String),
    Down,
    Unknown,
}

impl Presence {
    pub fn location(&self) -> Option<&str> {
        match self {
            Presence::Up(location) => Some(location),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MembershipDirectory {
    servers: CountingRwLock<Servers>,
}

impl MembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `node_id` as reachable at `location`.
    pub fn add_or_update(&self, node_id: &str, location: &str) {
        self.servers
            .write()
            .insert(node_id.to_string(), Some(location.to_string()));
        debug!(node = %node_id, location = %location, "Directory entry updated");
    }

    /// Tombstone `node_id`. Returns the location it had, if it was up.
    pub fn mark_down(&self, node_id: &str) -> Option<String> {
        let previous = self.servers.write().insert(node_id.to_string(), None);
        debug!(node = %node_id, "Directory entry marked down");
        previous.flatten()
    }

    pub fn location_of(&self, node_id: &str) -> Presence {
        match self.servers.read().get(node_id) {
            Some(Some(location)) => Presence::Up(location.clone()),
            Some(None) => Presence::Down,
            None => Presence::Unknown,
        }
    }

    /// Copy of the whole directory.
    pub fn snapshot(&self) -> Servers {
        self.servers.read().clone()
    }

    /// Fold in a received directory; incoming entries win.
    pub fn bulk_merge(&self, incoming: &Servers) {
        let mut servers = self.servers.write();
        for (node_id, location) in incoming {
            servers.insert(node_id.clone(), location.clone());
        }
    }

    /// Live members of `tier` as (id, location), ordered by instance number.
    pub fn reachable(&self, tier: Tier) -> Vec<(NodeId, String)> {
        let mut live: Vec<(NodeId, String)> = self
            .servers
            .read()
            .iter()
            .filter(|(node_id, _)| Tier::of(node_id) == Some(tier))
            .filter_map(|(node_id, location)| {
                location.as_ref().map(|l| (node_id.clone(), l.clone()))
            })
            .collect();
        live.sort_by_key(|(node_id, _)| (instance_of(node_id), node_id.clone()));
        live
    }

    /// Every known id of `tier`, live or not.
    pub fn ids(&self, tier: Tier) -> Vec<NodeId> {
        self.servers
            .read()
            .keys()
            .filter(|node_id| Tier::of(node_id) == Some(tier))
            .cloned()
            .collect()
    }

    /// Every live location, across all tiers.
    pub fn live_locations(&self) -> Vec<(NodeId, String)> {
        self.servers
            .read()
            .iter()
            .filter_map(|(node_id, location)| {
                location.as_ref().map(|l| (node_id.clone(), l.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence() {
        let directory = MembershipDirectory::new();
        assert_eq!(directory.location_of("store1"), Presence::Unknown);

        directory.add_or_update("store1", "127.0.0.1:7001");
        assert_eq!(
            directory.location_of("store1"),
            Presence::Up("127.0.0.1:7001".into())
        );

        assert_eq!(directory.mark_down("store1"), Some("127.0.0.1:7001".into()));
        assert_eq!(directory.location_of("store1"), Presence::Down);
        assert_eq!(directory.mark_down("store1"), None);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_bulk_merge_incoming_wins() {
        let directory = MembershipDirectory::new();
        directory.add_or_update("store1", "a:1");
        directory.add_or_update("store2", "b:2");

        let mut incoming = Servers::new();
        incoming.insert("store1".into(), None);
        incoming.insert("edge1".into(), Some("c:3".into()));
        directory.bulk_merge(&incoming);

        assert_eq!(directory.location_of("store1"), Presence::Down);
        assert_eq!(directory.location_of("store2").location(), Some("b:2"));
        assert_eq!(directory.snapshot().len(), 3);
    }

    #[test]
    fn test_tier_views() {
        let directory = MembershipDirectory::new();
        directory.add_or_update("store10", "x:10");
        directory.add_or_update("store2", "x:2");
        directory.add_or_update("store3", "x:3");
        directory.add_or_update("edge1", "y:1");
        directory.mark_down("store3");

        let live: Vec<_> = directory
            .reachable(Tier::Storage)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(live, vec!["store2", "store10"]);
        assert_eq!(directory.ids(Tier::Storage).len(), 3);
        assert_eq!(directory.ids(Tier::Edge), vec!["edge1"]);
        assert_eq!(directory.live_locations().len(), 3);
    }
}
