//! Server Module
//!
//! TCP server for warble nodes. Every tier runs the same accept loop and
//! differs only in the `Service` requests are dispatched to.

mod config;
mod handler;

pub use config::Config;
pub use handler::Handler;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::cluster::{NodeId, Tier};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::node;
use crate::protocol::{Reply, Request, WarbleCodec};
use crate::sync::TaskGroup;
use crate::transport::{TcpTransport, Transport};

/// Request dispatch for one tier.
///
/// Background work started while handling a request goes into `tasks`; the
/// caller joins it after the reply has been sent.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn handle(&self, request: Request, tasks: &mut TaskGroup) -> Reply;
}

/// Warble server
pub struct Server {
    config: Config,
    listener: TcpListener,
    location: String,
    service: Arc<dyn Service>,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
}

impl Server {
    /// Bind the listening socket and build the node for the configured tier
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let location = format!("{}:{}", config.advertise_host, local_addr.port());

        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new());
        let service = node::build(&config, transport.clone());

        Ok(Self {
            config,
            listener,
            location,
            service,
            transport,
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id()
    }

    /// Location other nodes reach this one at
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get metrics reference
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Announce this node to discovery, then serve connections forever
    pub async fn run(self) -> Result<()> {
        let node_id = self.node_id();
        let worker_limit = self.config.worker_limit();
        info!(
            "{} listening on {} as {} with {} workers",
            node_id,
            self.local_addr()?,
            self.location,
            worker_limit
        );

        self.announce(&node_id).await;

        let permits = Arc::new(Semaphore::new(worker_limit));
        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                return Ok(());
            };

            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }

                    let handler = Handler::new(self.service.clone(), self.metrics.clone());
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        let framed = Framed::new(socket, WarbleCodec::new());
                        if let Err(e) = handler.run(framed).await {
                            error!("Connection error from {}: {}", peer_addr, e);
                        }
                        debug!("Connection closed: {} | {}", peer_addr, metrics.summary());
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn announce(&self, node_id: &str) {
        if self.config.tier == Tier::Discovery {
            return;
        }
        let Some(discovery) = &self.config.discovery else {
            return;
        };

        let request = Request::Register {
            node_id: node_id.to_string(),
            location: self.location.clone(),
            tier: self.config.tier,
        };
        match self.transport.notify(discovery, request).await {
            Ok(()) => info!("Registered with discovery at {}", discovery),
            Err(e) => error!("Registration with discovery at {} failed: {}", discovery, e),
        }
    }
}
