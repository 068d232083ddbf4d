//! Per-request background task group.
//!
//! Fan-out work spawned while handling a request is collected here and joined
//! after the reply has gone out. Dropping an unjoined group detaches its
//! tasks instead of aborting them.

use std::future::Future;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Default)]
pub struct TaskGroup {
    tasks: JoinSet<()>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background task owned by this group.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tasks not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task in the group.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.tasks.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_waits_for_all() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();
        for i in 0..4 {
            let done = done.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(group.len(), 4);
        group.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();
        let flag = done.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        drop(group);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
