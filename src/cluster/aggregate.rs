//! Two-Round Snapshot Aggregation
//!
//! Round one asks every live storage node for an unbounded snapshot in
//! parallel. An owner is outdated when some other responder reports a larger
//! count for it than it reports for itself. Round two re-asks only the
//! outdated owners, bounded by the per-component maximum of every round-one
//! clock, and their improved answers replace the round-one ones.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::VectorClock;
use super::directory::MembershipDirectory;
use super::node::{NodeId, Tier};
use crate::error::{Error, Result};
use crate::protocol::{NodeSnapshot, Reply, ReplyBody, Request, Status};
use crate::transport::Transport;

/// Per-node snapshots keyed by storage node id
pub type Snapshots = BTreeMap<NodeId, NodeSnapshot>;

/// Owners whose self-reported count is below what another responder saw.
pub fn outdated_owners(snapshots: &Snapshots) -> Vec<NodeId> {
    snapshots
        .iter()
        .filter(|(owner, own)| {
            let self_reported = own.clock.count(owner);
            snapshots
                .iter()
                .any(|(other, theirs)| other != *owner && theirs.clock.count(owner) > self_reported)
        })
        .map(|(owner, _)| owner.clone())
        .collect()
}

/// Per-component maximum over every reported clock.
pub fn upper_bound(snapshots: &Snapshots) -> VectorClock {
    let mut bound = VectorClock::new();
    for snapshot in snapshots.values() {
        bound.merge(&snapshot.clock);
    }
    bound
}

pub struct SnapshotAggregator {
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
}

impl SnapshotAggregator {
    pub fn new(directory: Arc<MembershipDirectory>, transport: Arc<dyn Transport>) -> Self {
        Self {
            directory,
            transport,
        }
    }

    /// Collect a snapshot from every live storage node.
    pub async fn aggregate(&self) -> Snapshots {
        let targets = self.directory.reachable(Tier::Storage);
        let mut snapshots = self.collect(&targets, None).await;

        let outdated = outdated_owners(&snapshots);
        if outdated.is_empty() {
            return snapshots;
        }

        let bound = upper_bound(&snapshots);
        debug!(outdated = ?outdated, bound = %bound, "Re-requesting outdated snapshots");
        let retry: Vec<(NodeId, String)> = targets
            .into_iter()
            .filter(|(node_id, _)| outdated.contains(node_id))
            .collect();
        snapshots.extend(self.collect(&retry, Some(bound)).await);
        snapshots
    }

    async fn collect(&self, targets: &[(NodeId, String)], upper_bound: Option<VectorClock>) -> Snapshots {
        let requests = targets.iter().map(|(node_id, location)| {
            let request = Request::Snapshot {
                upper_bound: upper_bound.clone(),
            };
            async move { (node_id, self.request(location, request).await) }
        });

        join_all(requests)
            .await
            .into_iter()
            .filter_map(|(node_id, result)| match result {
                Ok(snapshot) => Some((node_id.clone(), snapshot)),
                Err(e) => {
                    warn!(node = %node_id, error = %e, "Snapshot request failed");
                    None
                }
            })
            .collect()
    }

    async fn request(&self, location: &str, request: Request) -> Result<NodeSnapshot> {
        match self.transport.call(location, request).await? {
            Reply {
                status: Status::Ok,
                body: Some(ReplyBody::Snapshot { snapshot, clock }),
            } => Ok(NodeSnapshot { snapshot, clock }),
            other => Err(Error::UnexpectedReply(format!("{} to snapshot", other.status))),
        }
    }
}
