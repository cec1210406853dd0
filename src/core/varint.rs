//! Base-128 varints for the packet header.
//!
//! Each byte carries 7 bits of the value, least-significant group first. A set
//! high bit means another byte follows. Header fields are `u32`, so an encoding
//! is never longer than [`MAX_VARINT_LEN`] bytes.

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

/// Longest encoding of a `u32`.
pub const MAX_VARINT_LEN: usize = 5;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Number of bytes `value` occupies once encoded.
#[inline]
pub fn encoded_len(value: u32) -> usize {
    let mut n = value >> 7;
    let mut len = 1;
    while n != 0 {
        len += 1;
        n >>= 7;
    }
    len
}

/// Append the encoding of `value` to `out`.
pub fn write<B: BufMut + ?Sized>(value: u32, out: &mut B) {
    let mut n = value;
    while n > u32::from(PAYLOAD_MASK) {
        out.put_u8((n as u8 & PAYLOAD_MASK) | CONTINUATION);
        n >>= 7;
    }
    out.put_u8(n as u8);
}

/// Decode a varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn read(input: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in input.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = u32::from(byte & PAYLOAD_MASK);
        // the fifth byte may only contribute the top four bits
        if i == MAX_VARINT_LEN - 1 && (byte & CONTINUATION != 0 || group > 0x0F) {
            return Err(ProtocolError::MalformedVarint);
        }
        value |= group << (i * 7);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ProtocolError::MalformedVarint)
}
