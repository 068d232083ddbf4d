//! Server Configuration

use std::time::Duration;

use crate::cluster::detector::{DEFAULT_BROADCAST_DELAY, DEFAULT_HEARTBEAT_INTERVAL};
use crate::cluster::replication::DEFAULT_POLL_INTERVAL;
use crate::cluster::{NodeId, ReplicationConfig, Tier};
use crate::error::{Error, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Tier this process serves
    pub tier: Tier,

    /// Instance number within the tier
    pub instance: u32,

    /// Bind address
    pub bind: String,

    /// Port number (0 picks a free port)
    pub port: u16,

    /// Host other nodes use to reach this one
    pub advertise_host: String,

    /// Location of the discovery node
    pub discovery: Option<String>,

    /// Heartbeat probe timeout and period
    pub heartbeat_interval: Duration,

    /// Re-check cadence for staleness waits
    pub poll_interval: Duration,

    /// Wait before sending a directory broadcast
    pub broadcast_delay: Duration,

    /// Pause before each replication push
    pub replication_delay: Duration,

    /// Bound on staleness waits (`None` waits forever)
    pub max_stale_wait: Option<Duration>,

    /// Concurrent connections served (0 = auto-detect)
    pub max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tier: Tier::Storage,
            instance: 1,
            bind: "0.0.0.0".to_string(),
            port: 7000,
            advertise_host: "127.0.0.1".to_string(),
            discovery: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            broadcast_delay: DEFAULT_BROADCAST_DELAY,
            replication_delay: Duration::ZERO,
            max_stale_wait: None,
            max_workers: 0, // Auto-detect
        }
    }
}

impl Config {
    /// Config for instance `instance` of `tier`
    pub fn new(tier: Tier, instance: u32) -> Self {
        Self {
            tier,
            instance,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }

    pub fn with_discovery(mut self, location: impl Into<String>) -> Self {
        self.discovery = Some(location.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_broadcast_delay(mut self, delay: Duration) -> Self {
        self.broadcast_delay = delay;
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

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Id of this node, e.g. `store2`
    pub fn node_id(&self) -> NodeId {
        self.tier.node_id(self.instance)
    }

    /// Connection limit with auto-detection resolved
    pub fn worker_limit(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get() * 64
        } else {
            self.max_workers
        }
    }

    pub fn replication(&self) -> ReplicationConfig {
        ReplicationConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_replication_delay(self.replication_delay)
            .with_max_stale_wait(self.max_stale_wait)
    }

    /// Reject configurations a node cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.tier != Tier::Discovery && self.discovery.is_none() {
            return Err(Error::Config(format!(
                "{} nodes need a discovery location",
                self.tier
            )));
        }
        if self.tier != Tier::Discovery && self.instance == 0 {
            return Err(Error::Config("instance numbers start at 1".into()));
        }
        if self.heartbeat_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config("intervals must be positive".into()));
        }
        Ok(())
    }
}
