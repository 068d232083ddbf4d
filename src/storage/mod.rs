//! Storage Engine
//!
//! Replicated multi-map held by storage nodes and the per-tag cache held by
//! edge nodes.

mod cache;
mod store;

pub use cache::{TagCache, DEFAULT_CACHE_READERS};
pub use store::{ReplicatedStore, SearchOutcome, StampRange, StampedValues, StoreSnapshot};

/// Default reader cap for the store on storage nodes
pub const DEFAULT_STORE_READERS: usize = 3;
