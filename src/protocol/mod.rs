//! Warble Wire Protocol
//!
//! 22-byte binary frame headers carrying JSON-encoded requests and replies.

mod codec;
mod frame;
mod message;

pub use codec::WarbleCodec;
pub use frame::{
    Frame, FrameHeader, FrameKind, FLAG_NO_REPLY, HEADER_SIZE, MAGIC, MAX_PAYLOAD,
};
pub use message::{NodeSnapshot, Reply, ReplyBody, Request, Status};
