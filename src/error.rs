//! Error types shared across the tiers.

use std::io;
use thiserror::Error;

/// Result alias used by the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket or listener failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A payload could not be encoded or decoded.
    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A frame violated the wire format.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A peer could not be reached at the given location.
    #[error("peer unreachable at {location}")]
    PeerUnreachable { location: String },

    /// A peer accepted the connection but closed it before replying.
    #[error("connection to {location} closed before a reply arrived")]
    NoReply { location: String },

    /// The operation did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A clock component was incremented before being seeded.
    #[error("clock has no component for node {0}")]
    UnknownClockComponent(String),

    /// A request was malformed; answered with BAD-REQUEST.
    #[error("bad request: {0}")]
    InvalidRequest(String),

    /// A peer answered with a body that does not fit the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures that mean "the peer is not there", which callers
    /// treat as "no update available" rather than as a fault.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable { .. } | Error::NoReply { .. } | Error::Timeout(_)
        )
    }
}
