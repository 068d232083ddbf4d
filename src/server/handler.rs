//! Connection Handler
//!
//! Decodes request frames, dispatches them to the node's service and writes
//! the reply back unless the sender asked for none.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::Service;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::protocol::{Frame, FrameKind, Reply, Request, WarbleCodec};
use crate::sync::TaskGroup;

/// Connection handler
pub struct Handler {
    service: Arc<dyn Service>,
    metrics: Arc<Metrics>,
}

impl Handler {
    /// Create a new handler
    pub fn new(service: Arc<dyn Service>, metrics: Arc<Metrics>) -> Self {
        Self { service, metrics }
    }

    /// Run the handler for a connection
    pub async fn run<T>(self, mut framed: Framed<T, WarbleCodec>) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(result) = framed.next().await {
            let frame = result?;
            let start = Instant::now();
            let request_id = frame.header.request_id;

            if frame.header.kind != FrameKind::Request {
                warn!(request_id, "Ignoring frame that is not a request");
                continue;
            }

            let mut tasks = TaskGroup::new();
            let (kind, reply) = match frame.message::<Request>() {
                Ok(request) => {
                    let kind = request.kind();
                    (kind, self.service.handle(request, &mut tasks).await)
                }
                Err(e) => ("malformed", Reply::bad_request(e.to_string())),
            };

            if frame.expects_reply() {
                let reply_frame = Frame::encode_message(FrameKind::Reply, request_id, &reply)?;
                framed.send(reply_frame).await?;
            }

            let elapsed = start.elapsed();
            self.metrics.record_request(kind, reply.status, elapsed);
            debug!(kind, status = %reply.status, latency = ?elapsed, "Request handled");

            tasks.join().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Status, FLAG_NO_REPLY};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Pong;

    #[async_trait]
    impl Service for Pong {
        async fn handle(&self, request: Request, _tasks: &mut TaskGroup) -> Reply {
            match request {
                Request::Probe => Reply::ok(),
                other => Reply::not_found(&other),
            }
        }
    }

    #[tokio::test]
    async fn test_request_reply_over_duplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let metrics = Arc::new(Metrics::new());
        let handler = Handler::new(Arc::new(Pong), metrics.clone());
        let serving = tokio::spawn(handler.run(Framed::new(server, WarbleCodec::new())));

        let mut client = Framed::new(client, WarbleCodec::new());

        let probe = Frame::encode_message(FrameKind::Request, 1, &Request::Probe).unwrap();
        client.send(probe).await.unwrap();
        let reply: Reply = client.next().await.unwrap().unwrap().message().unwrap();
        assert_eq!(reply.status, Status::Ok);

        // No reply is written for a notification.
        let quiet = Frame::encode_message(FrameKind::Request, 2, &Request::Probe)
            .unwrap()
            .with_flags(FLAG_NO_REPLY);
        client.send(quiet).await.unwrap();

        let garbage = Frame::new(FrameKind::Request, 3, Bytes::from_static(b"not json"));
        client.send(garbage).await.unwrap();
        let reply_frame = client.next().await.unwrap().unwrap();
        assert_eq!(reply_frame.header.request_id, 3);
        let reply: Reply = reply_frame.message().unwrap();
        assert_eq!(reply.status, Status::BadRequest);

        drop(client);
        serving.await.unwrap().unwrap();
        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.replies_with(Status::Ok), 2);
    }
}
