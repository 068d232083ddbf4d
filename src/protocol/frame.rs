//! Warble Frame Structure
//!
//! Binary frame format with a 22-byte header followed by a JSON payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Magic bytes identifying the protocol: "WRBL"
pub const MAGIC: [u8; 4] = [0x57, 0x52, 0x42, 0x4C];

/// Protocol version
pub const VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 22;

/// Largest accepted payload
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Flag: the sender does not wait for a reply
pub const FLAG_NO_REPLY: u16 = 0x0001;

/// Direction of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Reply = 0x02,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FrameKind::Request),
            0x02 => Some(FrameKind::Reply),
            _ => None,
        }
    }
}

/// Frame Header (22 bytes)
///
/// ```text
/// ┌──────────┬──────────┬──────────┬──────────┬─────────────────┐
/// │  Magic   │ Version  │   Kind   │  Flags   │  Payload Len    │
/// │ (4 bytes)│ (1 byte) │ (1 byte) │ (2 bytes)│   (4 bytes)     │
/// ├──────────┴──────────┴──────────┴──────────┴─────────────────┤
/// │  Request ID (8 bytes)  │  Reserved (2 bytes)                │
/// └─────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: FrameKind,
    pub flags: u16,
    pub payload_len: u32,
    pub request_id: u64,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, request_id: u64) -> Self {
        Self {
            version: VERSION,
            kind,
            flags: 0,
            payload_len: 0,
            request_id,
        }
    }

    pub fn with_payload_len(mut self, len: u32) -> Self {
        self.payload_len = len;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.flags);
        buf.put_u32(self.payload_len);
        buf.put_u64(self.request_id);
        buf.put_u16(0); // Reserved
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::InvalidFrame("truncated header".into()));
        }

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(Error::InvalidFrame("invalid magic bytes".into()));
        }

        let version = buf.get_u8();
        if version != VERSION {
            return Err(Error::InvalidFrame(format!("unsupported version: {}", version)));
        }
        let kind_byte = buf.get_u8();
        let kind = FrameKind::from_u8(kind_byte)
            .ok_or_else(|| Error::InvalidFrame(format!("invalid frame kind: {}", kind_byte)))?;
        let flags = buf.get_u16();
        let payload_len = buf.get_u32();
        let request_id = buf.get_u64();
        let _reserved = buf.get_u16();

        if payload_len as usize > MAX_PAYLOAD {
            return Err(Error::InvalidFrame(format!(
                "payload of {} bytes exceeds limit",
                payload_len
            )));
        }

        Ok(Self {
            version,
            kind,
            flags,
            payload_len,
            request_id,
        })
    }
}

/// Complete frame with header and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, request_id: u64, payload: Bytes) -> Self {
        let header = FrameHeader::new(kind, request_id).with_payload_len(payload.len() as u32);
        Self { header, payload }
    }

    /// Serialize `message` as the payload of a new frame.
    pub fn encode_message<T: Serialize>(kind: FrameKind, request_id: u64, message: &T) -> Result<Self> {
        let payload = serde_json::to_vec(message)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::InvalidFrame(format!(
                "payload of {} bytes exceeds limit",
                payload.len()
            )));
        }
        Ok(Self::new(kind, request_id, Bytes::from(payload)))
    }

    /// Deserialize the payload.
    pub fn message<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.header.flags = flags;
        self
    }

    pub fn expects_reply(&self) -> bool {
        self.header.flags & FLAG_NO_REPLY == 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        buf.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = FrameHeader::new(FrameKind::Request, 12345)
            .with_payload_len(100)
            .with_flags(FLAG_NO_REPLY);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Reply, 1).encode(&mut buf);
        buf[0] = b'X';
        assert!(matches!(
            FrameHeader::decode(&mut buf.freeze()),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(FrameKind::Request, 1)
            .with_payload_len(MAX_PAYLOAD as u32 + 1)
            .encode(&mut buf);
        assert!(FrameHeader::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_no_reply_flag() {
        let frame = Frame::new(FrameKind::Request, 7, Bytes::from_static(b"{}"));
        assert!(frame.expects_reply());
        let frame = frame.with_flags(FLAG_NO_REPLY);
        assert!(!frame.expects_reply());

        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }
}
