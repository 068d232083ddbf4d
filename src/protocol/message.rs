//! Request and reply messages
//!
//! Typed payloads carried inside frames, serialized as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::{NodeId, Servers, Tier, VectorClock};
use crate::storage::{StampRange, StampedValues, StoreSnapshot};

/// A request to any tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Posts under `tag`, newer than `version`, at least as recent as `clock`.
    /// Storage nodes require both; edges fill them in from their own state.
    Search {
        tag: String,
        #[serde(default)]
        version: Option<u64>,
        #[serde(default)]
        clock: Option<VectorClock>,
    },
    /// New post. Edges derive `tags` from the content themselves.
    Publish {
        #[serde(default)]
        content: String,
        #[serde(default)]
        tags: Vec<String>,
    },
    /// Catch-up pull: entries whose `subject` component lies in `bounds`
    /// (all entries when absent). `origin` and `clock` describe the requester.
    Pull {
        origin: NodeId,
        subject: NodeId,
        #[serde(default)]
        bounds: Option<StampRange>,
        #[serde(default)]
        clock: Option<VectorClock>,
    },
    /// Replicated write from `origin`
    Push {
        content: String,
        tags: Vec<String>,
        origin: NodeId,
        clock: VectorClock,
    },
    /// Liveness probe
    Probe,
    /// Join announcement to the discovery node
    Register {
        node_id: NodeId,
        location: String,
        tier: Tier,
    },
    /// Directory broadcast from the discovery node
    Directory { servers: Servers },
    /// Ask the discovery node for the directory
    FetchDirectory,
    /// Snapshot bounded by `upper_bound`, or everything
    Snapshot {
        #[serde(default)]
        upper_bound: Option<VectorClock>,
    },
}

impl Request {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Search { .. } => "search",
            Request::Publish { .. } => "publish",
            Request::Pull { .. } => "pull",
            Request::Push { .. } => "push",
            Request::Probe => "probe",
            Request::Register { .. } => "register",
            Request::Directory { .. } => "directory",
            Request::FetchDirectory => "fetch_directory",
            Request::Snapshot { .. } => "snapshot",
        }
    }
}

/// Reply status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Status {
    Ok,
    Created,
    NotModified,
    BadRequest,
    NotFound,
    InternalError,
}

impl Status {
    /// Numeric code, for display
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NotModified => 304,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::Created | Status::NotModified)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Created => "CREATED",
            Status::NotModified => "NOT-MODIFIED",
            Status::BadRequest => "BAD-REQUEST",
            Status::NotFound => "NOT-FOUND",
            Status::InternalError => "INTERNAL-ERROR",
        };
        write!(f, "{} {}", self.code(), name)
    }
}

/// One storage node's answer to a snapshot request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub snapshot: StoreSnapshot,
    pub clock: VectorClock,
}

/// Reply payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBody {
    /// Storage search result
    Posts {
        tag: String,
        posts: StampedValues,
        version: u64,
        clock: VectorClock,
    },
    /// Edge search result, causally ordered
    Feed { tag: String, posts: Vec<String> },
    /// Clock after a write
    Clock { clock: VectorClock },
    /// Catch-up delta
    Replica { delta: StoreSnapshot, clock: VectorClock },
    Directory { servers: Servers },
    Snapshot {
        snapshot: StoreSnapshot,
        clock: VectorClock,
    },
    /// Edge aggregation result, per storage node
    Aggregate {
        snapshots: BTreeMap<NodeId, NodeSnapshot>,
    },
    /// Human-readable detail for an error status
    Message { message: String },
}

/// Reply to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ReplyBody>,
}

impl Reply {
    pub fn new(status: Status, body: ReplyBody) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    /// Reply carrying a status only
    pub fn status(status: Status) -> Self {
        Self { status, body: None }
    }

    pub fn ok() -> Self {
        Self::status(Status::Ok)
    }

    pub fn not_modified() -> Self {
        Self::status(Status::NotModified)
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self::new(
            status,
            ReplyBody::Message {
                message: message.into(),
            },
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(Status::BadRequest, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::error(Status::InternalError, message)
    }

    /// Answer to a request this tier does not serve
    pub fn not_found(request: &Request) -> Self {
        Self::error(
            Status::NotFound,
            format!("unsupported request: {}", request.kind()),
        )
    }

    /// Error detail, if the body is a message
    pub fn message(&self) -> Option<&str> {
        match &self.body {
            Some(ReplyBody::Message { message }) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::Search {
            tag: "rust".into(),
            version: Some(0),
            clock: Some(VectorClock::new().with("store1", 2)),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "search");
        assert_eq!(json["clock"]["store1"], 2);

        let parsed: Request = serde_json::from_str(r#"{"type":"search","tag":"rust"}"#).unwrap();
        assert!(matches!(parsed, Request::Search { version: None, clock: None, .. }));

        let probe: Request = serde_json::from_str(r#"{"type":"probe"}"#).unwrap();
        assert_eq!(probe, Request::Probe);
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(Status::NotModified.to_string(), "304 NOT-MODIFIED");
        assert_eq!(
            serde_json::to_string(&Status::InternalError).unwrap(),
            r#""INTERNAL-ERROR""#
        );
        assert!(Status::Created.is_success());
        assert!(!Status::NotFound.is_success());
    }

    #[test]
    fn test_reply_without_body() {
        let json = serde_json::to_string(&Reply::ok()).unwrap();
        assert_eq!(json, r#"{"status":"OK"}"#);

        let reply = Reply::not_found(&Request::FetchDirectory);
        assert_eq!(reply.status, Status::NotFound);
        assert_eq!(reply.message(), Some("unsupported request: fetch_directory"));
    }
}
