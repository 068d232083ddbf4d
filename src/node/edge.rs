//! Edge tier service
//!
//! Client-facing front. Every request goes to one storage node picked by a
//! fixed mapping; search results are cached per tag so a storage node only
//! has to send posts when the tag's version moved. The edge clock only ever
//! absorbs the stamps of writes made through this edge.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cluster::{
    route_to_storage, MembershipDirectory, NodeClock, NodeId, SnapshotAggregator, Tier,
};
use crate::protocol::{Reply, ReplyBody, Request, Status};
use crate::server::Service;
use crate::storage::TagCache;
use crate::sync::TaskGroup;
use crate::transport::Transport;

/// Hashtags in `content`: a `#` followed by one or more non-whitespace
/// characters, everything up to the next whitespace. Returned without the
/// leading `#`, deduplicated, in order.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in content.split_whitespace() {
        let Some(start) = word.find('#') else {
            continue;
        };
        let tag = &word[start + 1..];
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

pub struct EdgeNode {
    node_id: NodeId,
    clock: NodeClock,
    cache: TagCache,
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
    aggregator: SnapshotAggregator,
}

impl EdgeNode {
    pub fn new(
        node_id: impl Into<NodeId>,
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            clock: NodeClock::new(node_id.clone(), Vec::<NodeId>::new()),
            node_id,
            cache: TagCache::new(),
            aggregator: SnapshotAggregator::new(directory.clone(), transport.clone()),
            directory,
            transport,
        }
    }

    pub fn clock(&self) -> &NodeClock {
        &self.clock
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn directory(&self) -> &Arc<MembershipDirectory> {
        &self.directory
    }

    /// Storage node this edge talks to right now, as (id, location)
    fn route(&self) -> Option<(NodeId, String)> {
        let live = self.directory.reachable(Tier::Storage);
        let ids: Vec<NodeId> = live.iter().map(|(id, _)| id.clone()).collect();
        let target = route_to_storage(&self.node_id, &ids)?;
        live.into_iter().find(|(id, _)| *id == target)
    }

    /// Forward `request` to the routed storage node.
    async fn forward(&self, request: Request) -> Result<Reply, Reply> {
        let Some((storage_id, location)) = self.route() else {
            return Err(Reply::internal_error("no storage node available"));
        };
        debug!(storage = %storage_id, kind = request.kind(), "Forwarding request");

        self.transport.call(&location, request).await.map_err(|e| {
            warn!(storage = %storage_id, error = %e, "Storage node request failed");
            Reply::internal_error(format!("{} unavailable", storage_id))
        })
    }

    async fn publish(&self, content: String) -> Reply {
        if content.trim().is_empty() {
            return Reply::bad_request("missing content");
        }
        let tags = extract_hashtags(&content);
        if tags.is_empty() {
            return Reply::bad_request("post has no hashtags");
        }

        let reply = match self.forward(Request::Publish { content, tags }).await {
            Ok(reply) => reply,
            Err(reply) => return reply,
        };
        if let Some(ReplyBody::Clock { clock }) = &reply.body {
            self.clock.merge(clock);
        }
        reply
    }

    async fn search(&self, tag: String) -> Reply {
        if tag.is_empty() {
            return Reply::bad_request("missing tag");
        }

        let request = Request::Search {
            tag: tag.clone(),
            version: Some(self.cache.version(&tag).unwrap_or(0)),
            clock: Some(self.clock.snapshot()),
        };
        let reply = match self.forward(request).await {
            Ok(reply) => reply,
            Err(reply) => return reply,
        };

        match reply {
            Reply {
                status: Status::Ok,
                body: Some(ReplyBody::Posts { posts, version, .. }),
            } => {
                debug!(tag = %tag, version, "Cache refreshed");
                self.cache.replace(&tag, version, posts);
            }
            Reply {
                status: Status::NotModified,
                ..
            } => {}
            other => return other,
        }

        let posts = self.cache.posts(&tag);
        Reply::new(Status::Ok, ReplyBody::Feed { tag, posts })
    }
}

#[async_trait]
impl Service for EdgeNode {
    async fn handle(&self, request: Request, _tasks: &mut TaskGroup) -> Reply {
        match request {
            Request::Publish { content, .. } => self.publish(content).await,
            Request::Search { tag, .. } => self.search(tag).await,
            Request::Snapshot { .. } => {
                let snapshots = self.aggregator.aggregate().await;
                Reply::new(Status::Ok, ReplyBody::Aggregate { snapshots })
            }
            Request::Directory { servers } => {
                self.directory.bulk_merge(&servers);
                self.clock.fill_missing(self.directory.ids(Tier::Storage));
                Reply::ok()
            }
            Request::Probe => Reply::ok(),
            other => Reply::not_found(&other),
        }
    }
}
