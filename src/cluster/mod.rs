//! Cluster Module
//!
//! Causal clocks, membership, failure detection and replication between
//! storage nodes.

pub mod aggregate;
pub mod clock;
pub mod detector;
pub mod directory;
pub mod node;
pub mod replication;

pub use aggregate::{SnapshotAggregator, Snapshots};
pub use clock::{NodeClock, OutdatedPeer, VectorClock};
pub use detector::{broadcast_directory, DetectorState, FailureDetector};
pub use directory::{MembershipDirectory, Presence, Servers};
pub use node::{route_to_storage, NodeId, Tier};
pub use replication::{ReplicationConfig, ReplicationCoordinator};
