//! TCP transport: one connection per request.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

use super::Transport;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameKind, Reply, Request, WarbleCodec, FLAG_NO_REPLY};

/// Default bound on establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    next_request_id: AtomicU64,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            next_request_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self, location: &str) -> Result<Framed<TcpStream, WarbleCodec>> {
        let unreachable = || Error::PeerUnreachable {
            location: location.to_string(),
        };
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(location))
            .await
            .map_err(|_| unreachable())?
            .map_err(|_| unreachable())?;
        stream.set_nodelay(true)?;
        Ok(Framed::new(stream, WarbleCodec::new()))
    }

    fn frame(&self, request: &Request) -> Result<Frame> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        Frame::encode_message(FrameKind::Request, request_id, request)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, location: &str, request: Request) -> Result<Reply> {
        let frame = self.frame(&request)?;
        let request_id = frame.header.request_id;
        let mut framed = self.connect(location).await?;
        framed.send(frame).await?;
        trace!(location = %location, kind = request.kind(), request_id, "Request sent");

        let reply = framed.next().await.ok_or_else(|| Error::NoReply {
            location: location.to_string(),
        })??;

        if reply.header.kind != FrameKind::Reply || reply.header.request_id != request_id {
            return Err(Error::InvalidFrame(format!(
                "expected reply to request {}, got {:?} {}",
                request_id, reply.header.kind, reply.header.request_id
            )));
        }
        reply.message()
    }

    async fn notify(&self, location: &str, request: Request) -> Result<()> {
        let frame = self.frame(&request)?.with_flags(FLAG_NO_REPLY);
        let mut framed = self.connect(location).await?;
        framed.send(frame).await?;
        framed.close().await?;
        trace!(location = %location, kind = request.kind(), "Notification sent");
        Ok(())
    }
}
