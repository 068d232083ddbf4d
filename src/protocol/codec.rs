//! Warble Codec
//!
//! Length-delimited framing for `Framed` streams. Nothing is consumed from
//! the read buffer until a whole frame has arrived.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{Frame, FrameHeader, HEADER_SIZE};
use crate::error::Error;

/// Tokio codec for warble frames
#[derive(Debug, Default, Clone, Copy)]
pub struct WarbleCodec;

impl WarbleCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for WarbleCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate the header in place; a bad header fails the stream early.
        let header = FrameHeader::decode(&mut &src[..HEADER_SIZE])?;
        let frame_len = HEADER_SIZE + header.payload_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let payload = frame.split_off(HEADER_SIZE).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for WarbleCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_SIZE + item.payload.len());
        item.encode(dst);
        Ok(())
    }
}
