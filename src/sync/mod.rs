//! Synchronization Primitives
//!
//! The counting reader/writer lock that guards every shared structure, and
//! the task group that owns per-request background work.

mod counting_lock;
mod task_group;

pub use counting_lock::{CountingRwLock, ReadGuard, WriteGuard};
pub use task_group::TaskGroup;
