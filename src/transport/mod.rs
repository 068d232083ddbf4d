//! Peer Transport
//!
//! How one node reaches another. `TcpTransport` speaks the framed wire
//! protocol; `MemoryTransport` dispatches straight into in-process services
//! and is what the multi-node tests run on.

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Reply, Request};

/// Request/reply channel to a peer addressed by location
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send `request` and wait for the reply.
    async fn call(&self, location: &str, request: Request) -> Result<Reply>;

    /// Send `request` without waiting for any reply.
    async fn notify(&self, location: &str, request: Request) -> Result<()>;
}
