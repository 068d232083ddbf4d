//! Warble Server Binary
//!
//! Runs one node of any tier: discovery, storage or edge.

use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use warble::{Config, Server, Tier};

/// Warble Server - one node of the cluster
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Tier to serve: discovery, storage or edge
    #[arg(short, long, default_value = "storage")]
    tier: Tier,

    /// Instance number within the tier
    #[arg(short, long, default_value_t = 1)]
    instance: u32,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port number
    #[arg(short, long, default_value_t = 7000)]
    port: u16,

    /// Host other nodes use to reach this one
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Discovery node location (host:port), required for storage and edge
    #[arg(short, long)]
    discovery: Option<String>,

    /// Heartbeat probe timeout and period in milliseconds
    #[arg(long, default_value_t = 5000)]
    heartbeat_ms: u64,

    /// Re-check cadence of staleness waits in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Delay before directory broadcasts in milliseconds
    #[arg(long, default_value_t = 1000)]
    broadcast_delay_ms: u64,

    /// Delay before each replication push in milliseconds
    #[arg(long, default_value_t = 0)]
    replication_delay_ms: u64,

    /// Give up staleness waits after this many milliseconds (unset waits forever)
    #[arg(long)]
    max_stale_wait_ms: Option<u64>,

    /// Concurrent connections served (0 = auto-detect based on CPU cores)
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warble=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = Config::new(args.tier, args.instance)
        .with_bind(&args.bind)
        .with_port(args.port)
        .with_advertise_host(&args.advertise_host)
        .with_heartbeat_interval(Duration::from_millis(args.heartbeat_ms))
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_broadcast_delay(Duration::from_millis(args.broadcast_delay_ms))
        .with_replication_delay(Duration::from_millis(args.replication_delay_ms))
        .with_max_stale_wait(args.max_stale_wait_ms.map(Duration::from_millis))
        .with_max_workers(args.workers);
    if let Some(discovery) = &args.discovery {
        config = config.with_discovery(discovery);
    }

    info!(
        "Starting warble {} node {} on {}:{}",
        config.tier,
        config.node_id(),
        args.bind,
        args.port
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
