//! # Core Protocol Components
//!
//! The packet format and the stream framing it travels in.
//!
//! ## Components
//! - **Varint**: base-128 header integers
//! - **Element**: tags and the per-type encode/decode contract
//! - **Decimal**: 128-bit decimal element value
//! - **Packet**: tagged binary message with typed reads and writes
//! - **Codec**: Tokio codec for length-prefixed frames over byte streams
//!
//! ## Wire Format
//! ```text
//! frame:  [Length(4, LE)] [Payload(Length - 4)]
//! packet: [OpCode(2)] [Id(8)] [BodyLength(varint)] [Elements(varint)] [0x00] [Body]
//! ```
//!
//! ## Security
//! - Frame length validated against the configured limit before buffering
//! - Packet body length checked against the frame before any element is read
//! - Packet buffers zeroed on disposal

pub mod codec;
pub mod decimal;
pub mod element;
pub mod packet;
pub mod varint;
