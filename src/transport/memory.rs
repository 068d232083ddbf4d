//! In-process transport
//!
//! Routes requests straight to registered services by location. Locations
//! can be made unreachable to simulate crashed peers, and every request is
//! logged so tests can assert on traffic.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;

use super::Transport;
use crate::error::{Error, Result};
use crate::protocol::{Reply, Request};
use crate::server::Service;
use crate::sync::TaskGroup;

#[derive(Default)]
pub struct MemoryTransport {
    services: DashMap<String, Arc<dyn Service>>,
    unreachable: DashSet<String>,
    log: Mutex<Vec<(String, Request)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `location` with `service`.
    pub fn register(&self, location: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(location.into(), service);
    }

    /// Make `location` (un)reachable without removing its service.
    pub fn set_reachable(&self, location: &str, reachable: bool) {
        if reachable {
            self.unreachable.remove(location);
        } else {
            self.unreachable.insert(location.to_string());
        }
    }

    /// Every request sent so far, with its target location.
    pub fn sent(&self) -> Vec<(String, Request)> {
        self.log.lock().clone()
    }

    /// Requests sent to `location` whose kind is `kind`.
    pub fn sent_to(&self, location: &str, kind: &str) -> Vec<Request> {
        self.log
            .lock()
            .iter()
            .filter(|(to, request)| to == location && request.kind() == kind)
            .map(|(_, request)| request.clone())
            .collect()
    }

    fn route(&self, location: &str, request: &Request) -> Result<Arc<dyn Service>> {
        self.log.lock().push((location.to_string(), request.clone()));
        if self.unreachable.contains(location) {
            return Err(Error::PeerUnreachable {
                location: location.to_string(),
            });
        }
        self.services
            .get(location)
            .map(|service| service.value().clone())
            .ok_or_else(|| Error::PeerUnreachable {
                location: location.to_string(),
            })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn call(&self, location: &str, request: Request) -> Result<Reply> {
        let service = self.route(location, &request)?;
        let mut tasks = TaskGroup::new();
        let reply = service.handle(request, &mut tasks).await;
        if !tasks.is_empty() {
            tokio::spawn(tasks.join());
        }
        Ok(reply)
    }

    async fn notify(&self, location: &str, request: Request) -> Result<()> {
        let service = self.route(location, &request)?;
        tokio::spawn(async move {
            let mut tasks = TaskGroup::new();
            service.handle(request, &mut tasks).await;
            tasks.join().await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        async fn handle(&self, request: Request, _tasks: &mut TaskGroup) -> Reply {
            match request {
                Request::Probe => Reply::ok(),
                other => Reply::not_found(&other),
            }
        }
    }

    #[tokio::test]
    async fn test_routes_and_logs() {
        let transport = MemoryTransport::new();
        transport.register("a:1", Arc::new(Echo));

        let reply = transport.call("a:1", Request::Probe).await.unwrap();
        assert_eq!(reply.status, Status::Ok);
        let reply = transport.call("a:1", Request::FetchDirectory).await.unwrap();
        assert_eq!(reply.status, Status::NotFound);

        assert!(transport.call("b:2", Request::Probe).await.unwrap_err().is_unreachable());
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(transport.sent_to("a:1", "probe").len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_toggle() {
        let transport = MemoryTransport::new();
        transport.register("a:1", Arc::new(Echo));

        transport.set_reachable("a:1", false);
        assert!(transport.call("a:1", Request::Probe).await.is_err());
        assert!(transport.notify("a:1", Request::Probe).await.is_err());

        transport.set_reachable("a:1", true);
        assert!(transport.call("a:1", Request::Probe).await.is_ok());
    }
}
