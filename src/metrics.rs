//! Request Metrics
//!
//! Per-request-kind counters, reply status counters and latency tracking.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::Status;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Total requests handled
    total_requests: AtomicU64,

    /// Requests per kind
    requests_by_kind: DashMap<&'static str, u64>,

    /// Replies per status
    replies_by_status: DashMap<Status, u64>,

    latency_sum_us: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            requests_by_kind: DashMap::new(),
            replies_by_status: DashMap::new(),
            latency_sum_us: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
        }
    }

    /// Record one handled request
    pub fn record_request(&self, kind: &'static str, status: Status, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        *self.requests_by_kind.entry(kind).or_insert(0) += 1;
        *self.replies_by_status.entry(status).or_insert(0) += 1;

        let latency_us = latency.as_micros() as u64;
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests per kind, sorted by kind
    pub fn requests_by_kind(&self) -> BTreeMap<&'static str, u64> {
        self.requests_by_kind
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Replies with the given status
    pub fn replies_with(&self, status: Status) -> u64 {
        self.replies_by_status.get(&status).map(|n| *n).unwrap_or(0)
    }

    /// Average latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        let count = self.total_requests();
        if count == 0 {
            return 0.0;
        }
        self.latency_sum_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn min_latency_us(&self) -> u64 {
        match self.latency_min_us.load(Ordering::Relaxed) {
            u64::MAX => 0,
            min => min,
        }
    }

    pub fn max_latency_us(&self) -> u64 {
        self.latency_max_us.load(Ordering::Relaxed)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "Requests: {} | Latency (µs): avg={:.1}, min={}, max={}",
            self.total_requests(),
            self.avg_latency_us(),
            self.min_latency_us(),
            self.max_latency_us()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();
        assert_eq!(metrics.min_latency_us(), 0);

        metrics.record_request("search", Status::Ok, Duration::from_micros(100));
        metrics.record_request("search", Status::NotModified, Duration::from_micros(200));
        metrics.record_request("publish", Status::Created, Duration::from_micros(150));

        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.min_latency_us(), 100);
        assert_eq!(metrics.max_latency_us(), 200);
        assert!((metrics.avg_latency_us() - 150.0).abs() < 0.1);

        let by_kind = metrics.requests_by_kind();
        assert_eq!(by_kind.get("search"), Some(&2));
        assert_eq!(by_kind.get("publish"), Some(&1));
        assert_eq!(metrics.replies_with(Status::Created), 1);
        assert_eq!(metrics.replies_with(Status::BadRequest), 0);
    }
}
