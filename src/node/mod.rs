//! Tier Services
//!
//! The request dispatch of each tier: storage nodes own a replicated store,
//! edge nodes front clients and cache responses, the discovery node keeps
//! the membership directory and watches storage nodes.

mod discovery;
mod edge;
mod storage;

pub use discovery::DiscoveryNode;
pub use edge::{extract_hashtags, EdgeNode};
pub use storage::StorageNode;

use std::sync::Arc;

use crate::cluster::{MembershipDirectory, Tier};
use crate::error::Error;
use crate::protocol::Reply;
use crate::server::{Config, Service};
use crate::transport::Transport;

/// Build the service for the configured tier.
pub fn build(config: &Config, transport: Arc<dyn Transport>) -> Arc<dyn Service> {
    let directory = Arc::new(MembershipDirectory::new());
    match config.tier {
        Tier::Storage => Arc::new(StorageNode::new(
            config.node_id(),
            config.replication(),
            directory,
            transport,
        )),
        Tier::Edge => Arc::new(EdgeNode::new(config.node_id(), directory, transport)),
        Tier::Discovery => Arc::new(
            DiscoveryNode::new(directory, transport)
                .with_heartbeat_interval(config.heartbeat_interval)
                .with_broadcast_delay(config.broadcast_delay),
        ),
    }
}

/// Error reply for a failed operation
fn error_reply(e: Error) -> Reply {
    match e {
        Error::InvalidRequest(message) => Reply::bad_request(message),
        other => Reply::internal_error(other.to_string()),
    }
}
