//! Replication Coordinator
//!
//! Causal replication between storage nodes. Local writes are stamped with
//! the node's own clock tick and pushed to every live peer in the
//! background. Reads first make sure the node has seen everything the
//! caller's clock claims, either by waiting for in-flight pushes or by
//! pulling a bounded delta from a live substitute when the ahead peer is
//! down.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::{NodeClock, OutdatedPeer, VectorClock};
use super::directory::{MembershipDirectory, Presence, Servers};
use super::node::{NodeId, Tier};
use crate::error::{Error, Result};
use crate::protocol::{Reply, ReplyBody, Request, Status};
use crate::storage::{ReplicatedStore, SearchOutcome, StampRange, StoreSnapshot};
use crate::sync::TaskGroup;
use crate::transport::Transport;

/// Default re-check cadence for staleness waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Replication configuration
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Re-check cadence while waiting for a peer's writes
    pub poll_interval: Duration,
    /// Pause before each outgoing push
    pub replication_delay: Duration,
    /// Give up waiting for a peer after this long (`None` waits forever)
    pub max_stale_wait: Option<Duration>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            replication_delay: Duration::ZERO,
            max_stale_wait: None,
        }
    }
}

impl ReplicationConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_replication_delay(mut self, delay: Duration) -> Self {
        self.replication_delay = delay;
        self
    }

    pub fn with_max_stale_wait(mut self, limit: Option<Duration>) -> Self {
        self.max_stale_wait = limit;
        self
    }
}

/// Replication coordinator of one storage node
pub struct ReplicationCoordinator {
    node_id: NodeId,
    config: ReplicationConfig,
    clock: Arc<NodeClock>,
    store: ReplicatedStore,
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
}

impl ReplicationCoordinator {
    pub fn new(
        node_id: impl Into<NodeId>,
        config: ReplicationConfig,
        store: ReplicatedStore,
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let node_id = node_id.into();
        let clock = Arc::new(NodeClock::new(node_id.clone(), [node_id.clone()]));
        Self {
            node_id,
            config,
            clock,
            store,
            directory,
            transport,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn clock(&self) -> &Arc<NodeClock> {
        &self.clock
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }

    pub fn directory(&self) -> &Arc<MembershipDirectory> {
        &self.directory
    }

    /// Apply a client write and fan it out.
    ///
    /// Returns the clock the entry was stamped with. The own component is
    /// ticked a second time after the fan-out is scheduled, so the node's
    /// clock is always ahead of anything it has handed out.
    pub fn publish(&self, content: &str, tags: &[String], tasks: &mut TaskGroup) -> Result<VectorClock> {
        validate_post(content, tags)?;

        let stamp = self.clock.tick()?;
        self.store.write(tags, content, &stamp);
        debug!(node = %self.node_id, clock = %stamp, "Post written");

        self.fan_out(content, tags, &stamp, tasks);
        self.clock.tick()?;
        Ok(stamp)
    }

    fn fan_out(&self, content: &str, tags: &[String], stamp: &VectorClock, tasks: &mut TaskGroup) {
        let peers = self
            .directory
            .reachable(Tier::Storage)
            .into_iter()
            .filter(|(peer_id, _)| *peer_id != self.node_id);

        for (peer_id, location) in peers {
            let request = Request::Push {
                content: content.to_string(),
                tags: tags.to_vec(),
                origin: self.node_id.clone(),
                clock: stamp.clone(),
            };
            let transport = self.transport.clone();
            let delay = self.config.replication_delay;

            tasks.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match transport.call(&location, request).await {
                    Ok(reply) if reply.status == Status::Ok => {
                        debug!(peer = %peer_id, "Push delivered");
                    }
                    Ok(reply) => warn!(peer = %peer_id, status = %reply.status, "Push rejected"),
                    Err(e) => warn!(peer = %peer_id, error = %e, "Push failed"),
                }
            });
        }
    }

    /// Apply a write pushed by `origin`. The entry is stamped with this
    /// node's clock after absorbing the origin's count and ticking.
    pub fn apply_push(&self, content: &str, tags: &[String], origin: &str, clock: &VectorClock) -> Result<VectorClock> {
        validate_post(content, tags)?;
        if origin.is_empty() {
            return Err(Error::InvalidRequest("missing origin".into()));
        }

        let stamp = self.clock.absorb_and_tick(origin, clock.count(origin))?;
        self.store.write(tags, content, &stamp);
        debug!(node = %self.node_id, origin = %origin, clock = %stamp, "Push applied");
        Ok(stamp)
    }

    /// Search after catching up with `caller_clock`.
    pub async fn search(&self, tag: &str, version: Option<u64>, caller_clock: &VectorClock) -> SearchOutcome {
        self.resolve_staleness(caller_clock).await;
        self.store.search(tag, version)
    }

    /// Make sure every write `caller_clock` claims has been seen locally.
    /// Peers that are down are caught up from a live substitute; live peers
    /// are waited for. Failures degrade to serving local state.
    pub async fn resolve_staleness(&self, caller_clock: &VectorClock) {
        for peer in self.clock.outdated_peers(caller_clock) {
            if Tier::of(&peer.node_id) != Some(Tier::Storage) {
                continue;
            }

            match self.directory.location_of(&peer.node_id) {
                Presence::Up(_) => {
                    if self.clock.count(&peer.node_id) >= peer.target {
                        continue;
                    }
                    self.wait_for(&peer).await;
                }
                Presence::Down | Presence::Unknown => {
                    match self.catch_up_from_substitute(&peer).await {
                        Ok(_) => {}
                        Err(e) if e.is_unreachable() => {
                            debug!(peer = %peer.node_id, error = %e, "Substitute unreachable, serving local state");
                        }
                        Err(e) => warn!(peer = %peer.node_id, error = %e, "Catch-up failed"),
                    }
                }
            }
        }
    }

    async fn wait_for(&self, peer: &OutdatedPeer) {
        debug!(peer = %peer.node_id, target = peer.target, local = peer.local, "Waiting for peer writes");
        let caught_up = self
            .clock
            .wait_until(self.config.poll_interval, |clock| {
                clock.count(&peer.node_id) >= peer.target
            });

        match self.config.max_stale_wait {
            None => caught_up.await,
            Some(limit) => {
                if tokio::time::timeout(limit, caught_up).await.is_err() {
                    warn!(peer = %peer.node_id, target = peer.target, "Gave up waiting for peer writes");
                }
            }
        }
    }

    /// Pull `(local, target]` of the peer's writes from any other live
    /// storage node. Returns whether anything was merged.
    async fn catch_up_from_substitute(&self, peer: &OutdatedPeer) -> Result<bool> {
        let substitute = self
            .directory
            .reachable(Tier::Storage)
            .into_iter()
            .find(|(id, _)| *id != self.node_id && *id != peer.node_id);

        let Some((substitute_id, location)) = substitute else {
            debug!(peer = %peer.node_id, "No substitute to catch up from");
            return Ok(false);
        };

        let bounds = StampRange::new(peer.local, peer.target);
        match self.pull(&location, &peer.node_id, Some(bounds)).await? {
            Some((delta, _)) => {
                self.clock.tick()?;
                let merged = self.store.merge(&delta);
                self.clock.observe(&peer.node_id, peer.target);
                info!(peer = %peer.node_id, from = %substitute_id, merged, "Caught up from substitute");
                Ok(true)
            }
            None => {
                // The substitute holds nothing in the range either.
                self.clock.observe(&peer.node_id, peer.target);
                debug!(peer = %peer.node_id, from = %substitute_id, "Substitute has no newer writes");
                Ok(false)
            }
        }
    }

    /// Ask the node at `location` for entries whose `subject` component lies
    /// in `bounds` (everything when `None`).
    pub async fn pull(
        &self,
        location: &str,
        subject: &str,
        bounds: Option<StampRange>,
    ) -> Result<Option<(StoreSnapshot, VectorClock)>> {
        let request = Request::Pull {
            origin: self.node_id.clone(),
            subject: subject.to_string(),
            bounds,
            clock: Some(self.clock.snapshot()),
        };

        let reply = self.transport.call(location, request).await?;
        match reply {
            Reply {
                status: Status::Ok,
                body: Some(ReplyBody::Replica { delta, clock }),
            } => Ok(Some((delta, clock))),
            Reply {
                status: Status::NotModified,
                ..
            } => Ok(None),
            other => Err(Error::UnexpectedReply(format!("{} to pull", other.status))),
        }
    }

    /// Serve a pull: raise the requester's component, then return the
    /// matching delta, or `None` if it is empty.
    pub fn serve_pull(
        &self,
        origin: &str,
        subject: &str,
        bounds: Option<StampRange>,
        requester_clock: &VectorClock,
    ) -> Option<(StoreSnapshot, VectorClock)> {
        if let Some(count) = requester_clock.get(origin) {
            self.clock.observe(origin, count);
        }

        let delta = self.store.snapshot_between(bounds, subject);
        if delta.is_empty() {
            return None;
        }
        Some((delta, self.clock.snapshot()))
    }

    /// Entries preceding `upper_bound` (all entries without one), once this
    /// node's own component has reached the bound's value for it.
    pub async fn snapshot(&self, upper_bound: Option<VectorClock>) -> (StoreSnapshot, VectorClock) {
        let Some(bound) = upper_bound else {
            return (self.store.snapshot_before(None, &self.node_id), self.clock.snapshot());
        };

        let target = bound.count(&self.node_id);
        let reached = self
            .clock
            .wait_until(self.config.poll_interval, |clock| clock.count(&self.node_id) >= target);
        match self.config.max_stale_wait {
            None => reached.await,
            Some(limit) => {
                if tokio::time::timeout(limit, reached).await.is_err() {
                    warn!(target, "Snapshot served before reaching the requested bound");
                }
            }
        }

        (
            self.store.snapshot_before(Some(&bound), &self.node_id),
            self.clock.snapshot(),
        )
    }

    /// Fold in a directory broadcast: merge it, run the join catch-up if this
    /// node has seen nothing yet, then seed a clock component for every known
    /// storage node.
    pub async fn apply_directory(&self, servers: &Servers) {
        self.directory.bulk_merge(servers);
        if self.clock.own() == 0 {
            self.join_catch_up().await;
        }
        self.clock.fill_missing(self.directory.ids(Tier::Storage));
    }

    /// Pull a full copy from the first live storage peer that has anything.
    /// Returns whether a copy was merged.
    pub async fn join_catch_up(&self) -> bool {
        let peers = self
            .directory
            .reachable(Tier::Storage)
            .into_iter()
            .filter(|(peer_id, _)| *peer_id != self.node_id);

        for (peer_id, location) in peers {
            match self.pull(&location, &peer_id, None).await {
                Ok(Some((delta, clock))) => {
                    let merged = self.store.merge(&delta);
                    self.clock.merge(&clock);
                    if let Err(e) = self.clock.tick() {
                        warn!(error = %e, "Clock tick after join catch-up failed");
                    }
                    info!(from = %peer_id, merged, "Join catch-up complete");
                    return true;
                }
                Ok(None) => continue,
                Err(e) => warn!(peer = %peer_id, error = %e, "Join catch-up pull failed"),
            }
        }
        false
    }
}

fn validate_post(content: &str, tags: &[String]) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::InvalidRequest("missing content".into()));
    }
    if tags.is_empty() || tags.iter().any(|tag| tag.is_empty()) {
        return Err(Error::InvalidRequest("missing tags".into()));
    }
    Ok(())
}
