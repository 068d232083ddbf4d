//! Cluster Node Identity
//!
//! Node ids carry their tier as a prefix and their instance number as a
//! suffix: `store1`, `edge2`, `discovery`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique node identifier
pub type NodeId = String;

/// Node tier in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Replicated storage node
    Storage,
    /// Client-facing front node
    Edge,
    /// Membership master
    Discovery,
}

impl Tier {
    /// Id prefix used by nodes of this tier
    pub fn prefix(self) -> &'static str {
        match self {
            Tier::Storage => "store",
            Tier::Edge => "edge",
            Tier::Discovery => "discovery",
        }
    }

    /// Tier of a node id, judged by its prefix
    pub fn of(node_id: &str) -> Option<Tier> {
        [Tier::Discovery, Tier::Storage, Tier::Edge]
            .into_iter()
            .find(|tier| node_id.starts_with(tier.prefix()))
    }

    /// Build the id of instance `instance` of this tier
    pub fn node_id(self, instance: u32) -> NodeId {
        match self {
            Tier::Discovery => self.prefix().to_string(),
            _ => format!("{}{}", self.prefix(), instance),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Storage => write!(f, "storage"),
            Tier::Edge => write!(f, "edge"),
            Tier::Discovery => write!(f, "discovery"),
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "storage" | "store" | "datastore" => Ok(Tier::Storage),
            "edge" | "frontend" => Ok(Tier::Edge),
            "discovery" => Ok(Tier::Discovery),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Instance number encoded in a node id (`store3` -> 3)
pub fn instance_of(node_id: &str) -> Option<u32> {
    let tier = Tier::of(node_id)?;
    node_id[tier.prefix().len()..].parse().ok()
}

/// Fixed routing from an edge node to a storage node.
///
/// `edge<N>` targets `store<N>`. If that node is not live, the live storage
/// node with the smallest instance number above N is used, then the smallest
/// live instance overall. `live_storage` holds the ids currently reachable.
pub fn route_to_storage(edge_id: &str, live_storage: &[NodeId]) -> Option<NodeId> {
    let instance = instance_of(edge_id).unwrap_or(0);
    let preferred = Tier::Storage.node_id(instance);
    if live_storage.iter().any(|id| *id == preferred) {
        return Some(preferred);
    }

    let mut candidates: Vec<(u32, &NodeId)> = live_storage
        .iter()
        .filter_map(|id| instance_of(id).map(|n| (n, id)))
        .collect();
    candidates.sort();

    candidates
        .iter()
        .find(|(n, _)| *n > instance)
        .or_else(|| candidates.first())
        .map(|(_, id)| (*id).clone())
}
