//! Warble - Causally Consistent Hashtag Feed Service
//!
//! A three-tier cluster: edge nodes front clients, storage nodes keep a fully
//! replicated hashtag index under vector clocks, and a discovery node tracks
//! membership with heartbeat failure detection.

pub mod cluster;
pub mod error;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod sync;
pub mod transport;

pub use cluster::{MembershipDirectory, NodeClock, NodeId, Tier, VectorClock};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use node::{extract_hashtags, DiscoveryNode, EdgeNode, StorageNode};
pub use protocol::{Frame, Reply, ReplyBody, Request, Status, WarbleCodec};
pub use server::{Config, Server, Service};
pub use storage::{ReplicatedStore, TagCache};
pub use transport::{MemoryTransport, TcpTransport, Transport};
