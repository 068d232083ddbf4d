//! Discovery tier service
//!
//! Accepts registrations, starts one failure detector per storage location
//! and broadcasts the directory after every membership change.

use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cluster::detector::{DEFAULT_BROADCAST_DELAY, DEFAULT_HEARTBEAT_INTERVAL};
use crate::cluster::{broadcast_directory, FailureDetector, MembershipDirectory, NodeId, Tier};
use crate::protocol::{Reply, ReplyBody, Request, Status};
use crate::server::Service;
use crate::sync::TaskGroup;
use crate::transport::Transport;

pub struct DiscoveryNode {
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
    /// Storage locations with a running detector
    monitored: Arc<DashSet<String>>,
    heartbeat_interval: Duration,
    broadcast_delay: Duration,
}

impl DiscoveryNode {
    pub fn new(directory: Arc<MembershipDirectory>, transport: Arc<dyn Transport>) -> Self {
        Self {
            directory,
            transport,
            monitored: Arc::new(DashSet::new()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            broadcast_delay: DEFAULT_BROADCAST_DELAY,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_broadcast_delay(mut self, delay: Duration) -> Self {
        self.broadcast_delay = delay;
        self
    }

    pub fn directory(&self) -> &Arc<MembershipDirectory> {
        &self.directory
    }

    /// Whether a detector is running for `location`
    pub fn is_monitored(&self, location: &str) -> bool {
        self.monitored.contains(location)
    }

    fn register(&self, node_id: NodeId, location: String, tier: Tier, tasks: &mut TaskGroup) -> Reply {
        if Tier::of(&node_id) != Some(tier) || tier == Tier::Discovery {
            return Reply::bad_request(format!("{} is not a valid {} node id", node_id, tier));
        }
        if location.is_empty() {
            return Reply::bad_request("missing location");
        }

        self.directory.add_or_update(&node_id, &location);
        info!(node = %node_id, location = %location, "Node registered");

        if tier == Tier::Storage && self.monitored.insert(location.clone()) {
            self.monitor(node_id, location);
        }

        let directory = self.directory.clone();
        let transport = self.transport.clone();
        let delay = self.broadcast_delay;
        tasks.spawn(async move {
            broadcast_directory(&directory, transport.as_ref(), delay).await;
        });
        Reply::ok()
    }

    fn monitor(&self, node_id: NodeId, location: String) {
        let detector = FailureDetector::new(
            node_id,
            location.clone(),
            self.directory.clone(),
            self.transport.clone(),
        )
        .with_interval(self.heartbeat_interval)
        .with_broadcast_delay(self.broadcast_delay);
        let monitored = self.monitored.clone();

        tokio::spawn(async move {
            detector.run().await;
            monitored.remove(&location);
        });
    }
}

#[async_trait]
impl Service for DiscoveryNode {
    async fn handle(&self, request: Request, tasks: &mut TaskGroup) -> Reply {
        match request {
            Request::Register {
                node_id,
                location,
                tier,
            } => self.register(node_id, location, tier, tasks),
            Request::FetchDirectory => Reply::new(
                Status::Ok,
                ReplyBody::Directory {
                    servers: self.directory.snapshot(),
                },
            ),
            Request::Probe => Reply::ok(),
            other => Reply::not_found(&other),
        }
    }
}
