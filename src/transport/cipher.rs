//! Per-connection cipher hook.
//!
//! A cipher transforms whole frame payloads: `encode` runs on the plaintext just
//! before framing, `decode` on the payload right after de-framing. Both work in
//! place so an implementation may change the buffer length (nonces, tags).

use crate::error::Result;

pub trait Cipher: Send {
    fn encode(&mut self, data: &mut Vec<u8>) -> Result<()>;

    fn decode(&mut self, data: &mut Vec<u8>) -> Result<()>;

    /// Release key material. Called once when the connection is torn down.
    fn dispose(&mut self) {}
}
