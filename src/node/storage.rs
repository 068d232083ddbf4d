//! Storage tier service.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::error_reply;
use crate::cluster::{MembershipDirectory, NodeId, ReplicationConfig, ReplicationCoordinator};
use crate::protocol::{Reply, ReplyBody, Request, Status};
use crate::server::Service;
use crate::storage::{ReplicatedStore, SearchOutcome, DEFAULT_STORE_READERS};
use crate::sync::TaskGroup;
use crate::transport::Transport;

/// A storage node: replicated store plus its replication coordinator
pub struct StorageNode {
    coordinator: ReplicationCoordinator,
}

impl StorageNode {
    pub fn new(
        node_id: impl Into<NodeId>,
        config: ReplicationConfig,
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = ReplicatedStore::with_max_readers(DEFAULT_STORE_READERS);
        Self {
            coordinator: ReplicationCoordinator::new(node_id, config, store, directory, transport),
        }
    }

    pub fn coordinator(&self) -> &ReplicationCoordinator {
        &self.coordinator
    }
}

#[async_trait]
impl Service for StorageNode {
    async fn handle(&self, request: Request, tasks: &mut TaskGroup) -> Reply {
        let node = &self.coordinator;
        match request {
            Request::Search { tag, version, clock } => {
                if tag.is_empty() {
                    return Reply::bad_request("missing tag");
                }
                let (Some(version), Some(clock)) = (version, clock) else {
                    return Reply::bad_request("search needs the caller's version and clock");
                };
                match node.search(&tag, Some(version), &clock).await {
                    SearchOutcome::Unchanged { version } => {
                        debug!(tag = %tag, version, "Search not modified");
                        Reply::not_modified()
                    }
                    SearchOutcome::Changed { entries, version } => Reply::new(
                        Status::Ok,
                        ReplyBody::Posts {
                            tag,
                            posts: entries,
                            version,
                            clock: node.clock().snapshot(),
                        },
                    ),
                }
            }

            Request::Publish { content, tags } => match node.publish(&content, &tags, tasks) {
                Ok(clock) => Reply::new(Status::Created, ReplyBody::Clock { clock }),
                Err(e) => error_reply(e),
            },

            Request::Push {
                content,
                tags,
                origin,
                clock,
            } => match node.apply_push(&content, &tags, &origin, &clock) {
                Ok(_) => Reply::ok(),
                Err(e) => error_reply(e),
            },

            Request::Pull {
                origin,
                subject,
                bounds,
                clock,
            } => {
                let Some(clock) = clock else {
                    return Reply::bad_request("pull needs the requester's clock");
                };
                match node.serve_pull(&origin, &subject, bounds, &clock) {
                    Some((delta, clock)) => Reply::new(Status::Ok, ReplyBody::Replica { delta, clock }),
                    None => Reply::not_modified(),
                }
            }

            Request::Snapshot { upper_bound } => {
                let (snapshot, clock) = node.snapshot(upper_bound).await;
                Reply::new(Status::Ok, ReplyBody::Snapshot { snapshot, clock })
            }

            Request::Directory { servers } => {
                node.apply_directory(&servers).await;
                Reply::ok()
            }

            Request::Probe => Reply::ok(),

            other => Reply::not_found(&other),
        }
    }
}
