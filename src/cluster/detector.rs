//! Heartbeat Failure Detection
//!
//! One detector per monitored storage node. Each cycle sends a probe bounded
//! by the detection interval; the first probe that goes unanswered marks the
//! node down in the directory and broadcasts the new directory. A detector
//! fires at most once.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::directory::MembershipDirectory;
use super::node::NodeId;
use crate::error::Error;
use crate::protocol::Request;
use crate::transport::Transport;

/// Default heartbeat / detection interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default wait before a directory broadcast goes out
pub const DEFAULT_BROADCAST_DELAY: Duration = Duration::from_millis(1000);

/// Detector state machine: `Probing -> Alive | Dead`, `Alive -> Probing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Probing,
    Alive,
    Dead,
}

pub struct FailureDetector {
    node_id: NodeId,
    location: String,
    directory: Arc<MembershipDirectory>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    initial_wait: Duration,
    broadcast_delay: Duration,
    state: DetectorState,
}

impl FailureDetector {
    pub fn new(
        node_id: impl Into<NodeId>,
        location: impl Into<String>,
        directory: Arc<MembershipDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            location: location.into(),
            directory,
            transport,
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            initial_wait: DEFAULT_HEARTBEAT_INTERVAL,
            broadcast_delay: DEFAULT_BROADCAST_DELAY,
            state: DetectorState::Probing,
        }
    }

    /// Probe timeout and pause between probes. Also resets the initial wait.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.initial_wait = interval;
        self
    }

    /// Grace period before the first probe
    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    pub fn with_broadcast_delay(mut self, delay: Duration) -> Self {
        self.broadcast_delay = delay;
        self
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Run one probe cycle.
    pub async fn probe(&mut self) -> DetectorState {
        if self.state == DetectorState::Dead {
            return self.state;
        }
        self.state = DetectorState::Probing;

        let probe = self.transport.call(&self.location, Request::Probe);
        let outcome = tokio::time::timeout(self.interval, probe)
            .await
            .unwrap_or(Err(Error::Timeout(self.interval)));
        self.state = match outcome {
            Ok(_) => DetectorState::Alive,
            Err(e) => {
                debug!(node = %self.node_id, error = %e, "Probe missed");
                DetectorState::Dead
            }
        };

        if self.state == DetectorState::Dead {
            self.on_death().await;
        }
        self.state
    }

    /// Probe until the node is declared dead.
    pub async fn run(mut self) -> DetectorState {
        info!(node = %self.node_id, location = %self.location, "Monitoring node");
        tokio::time::sleep(self.initial_wait).await;

        loop {
            match self.probe().await {
                DetectorState::Dead => return DetectorState::Dead,
                _ => tokio::time::sleep(self.interval).await,
            }
        }
    }

    async fn on_death(&self) {
        warn!(node = %self.node_id, location = %self.location, "Node missed heartbeat, marking down");
        self.directory.mark_down(&self.node_id);
        broadcast_directory(&self.directory, self.transport.as_ref(), self.broadcast_delay).await;
    }
}

/// Wait `delay`, then send the current directory to every live node.
/// Failures are logged only. Returns the number of nodes reached.
pub async fn broadcast_directory(
    directory: &MembershipDirectory,
    transport: &dyn Transport,
    delay: Duration,
) -> usize {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let servers = directory.snapshot();
    let targets = directory.live_locations();
    let sends = targets.iter().map(|(node_id, location)| {
        let request = Request::Directory {
            servers: servers.clone(),
        };
        async move {
            match transport.notify(location, request).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(node = %node_id, error = %e, "Directory broadcast failed");
                    false
                }
            }
        }
    });

    let reached = join_all(sends).await.into_iter().filter(|ok| *ok).count();
    debug!(reached, total = targets.len(), "Directory broadcast sent");
    reached
}
