//! # Frame Codec
//!
//! Length-prefixed framing for byte streams.
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Payload(Length - 4)]
//! ```
//!
//! The length counts its own four bytes. Partial frames stay buffered until the
//! rest arrives; a declared length below 4 or above the configured limit is a
//! protocol violation and ends the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use zeroize::Zeroize;

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// `max_frame_size` bounds the declared total length, prefix included.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let declared = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if declared < FRAME_HEADER_LEN {
            return Err(ProtocolError::InvalidFrameLength(declared));
        }
        if declared > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(declared));
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(declared);
        frame.advance(FRAME_HEADER_LEN);
        Ok(Some(frame))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, mut payload: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        let total = payload.len() + FRAME_HEADER_LEN;
        if total > self.max_frame_size || total > u32::MAX as usize {
            payload.zeroize();
            return Err(ProtocolError::OversizedFrame(total));
        }

        dst.reserve(total);
        dst.put_u32_le(total as u32);
        dst.put_slice(&payload);
        payload.zeroize();
        Ok(())
    }
}
