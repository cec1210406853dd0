//! # Packet
//!
//! A protocol message: an opcode, a correlation id and a body of tagged elements.
//!
//! ## Wire Format
//! ```text
//! [OpCode(2, LE)] [Id(8, LE)] [BodyLength(varint)] [Elements(varint)] [0x00] [Body(BodyLength)]
//! ```
//!
//! Writes append elements and keep `body_length` / `element_count` exact; reads
//! walk a cursor through the body, checking each element's tag first. The body
//! sits behind a reader/writer lock so that builds and peeks can share access
//! while writes, reads and disposal take it exclusively.

use std::fmt;
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};

use bytes::BufMut;
use tracing::trace;
use zeroize::Zeroize;

use crate::core::decimal::Decimal;
use crate::core::element::{BinaryObject, Readable, Tag, Writable, LENGTH_PREFIX_LEN};
use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::sync::RwLockExt;

/// Initial body capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Minimum growth step when a write overflows the body buffer.
pub const GROWTH_STEP: usize = 512;

/// Byte closing the header.
pub const HEADER_TERMINATOR: u8 = 0x00;

/// Opcode and id.
const FIXED_HEADER_LEN: usize = 2 + 8;

/// Fixed header, two single-byte varints and the terminator.
pub const MIN_PACKET_LEN: usize = FIXED_HEADER_LEN + 3;

/// Read position over a body slice.
struct ElementCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ElementCursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn peek(&self) -> Result<Tag> {
        // a tag without at least one payload byte cannot start an element
        if self.pos + 2 > self.buf.len() {
            return Ok(Tag::None);
        }
        let byte = self.buf[self.pos];
        Tag::from_byte(byte).ok_or(ProtocolError::InvalidTag(byte))
    }

    fn bounded(&self, start: usize, len: usize) -> Result<&'a [u8]> {
        self.buf
            .get(start..start + len)
            .ok_or(ProtocolError::UnexpectedEof {
                needed: len,
                available: self.buf.len().saturating_sub(start),
            })
    }

    /// Data bytes of the element under the cursor and the position after it.
    fn span(&self, tag: Tag) -> Result<(&'a [u8], usize)> {
        let mut start = self.pos + 1;
        let len = match tag.fixed_width() {
            Some(width) => width,
            None => {
                let prefix = self.bounded(start, LENGTH_PREFIX_LEN)?;
                start += LENGTH_PREFIX_LEN;
                usize::from(u16::from_le_bytes([prefix[0], prefix[1]]))
            }
        };
        let data = self.bounded(start, len)?;
        Ok((data, start + len))
    }

    /// Payload of the next element if it carries `expected`; `None` at the end.
    fn take(&mut self, expected: Tag) -> Result<Option<&'a [u8]>> {
        let found = self.peek()?;
        if found == Tag::None {
            return Ok(None);
        }
        if found != expected {
            return Err(ProtocolError::TypeMismatch { expected, found });
        }
        let (data, next) = self.span(found)?;
        self.pos = next;
        Ok(Some(data))
    }

    fn read<T: Readable>(&mut self) -> Result<T> {
        let start = self.pos;
        match self.take(T::TAG)? {
            Some(data) => T::decode(data).inspect_err(|_| self.pos = start),
            None => Ok(T::default()),
        }
    }

    fn skip_one(&mut self) -> Result<bool> {
        let tag = self.peek()?;
        if tag == Tag::None {
            return Ok(false);
        }
        let (_, next) = self.span(tag)?;
        self.pos = next;
        Ok(true)
    }
}

#[derive(Clone)]
struct Body {
    buf: Vec<u8>,
    elements: u32,
    cursor: usize,
}

impl Body {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            elements: 0,
            cursor: 0,
        }
    }

    fn reserve_for(&mut self, required: usize) -> Result<()> {
        let free = self.buf.capacity() - self.buf.len();
        if required <= free {
            return Ok(());
        }
        let grow = GROWTH_STEP.max(required.saturating_mul(2));
        self.buf
            .try_reserve_exact(free + grow)
            .map_err(|e| ProtocolError::Allocation(e.to_string()))
    }

    fn append<T: Writable + ?Sized>(&mut self, value: &T) -> Result<()> {
        let data_len = value.payload_len();
        let prefix_len = if T::TAG.is_variable() {
            if data_len > usize::from(u16::MAX) {
                return Err(ProtocolError::ElementTooLarge(data_len));
            }
            LENGTH_PREFIX_LEN
        } else {
            0
        };
        let total = 1 + prefix_len + data_len;
        if self.buf.len() + total > u32::MAX as usize || self.elements == u32::MAX {
            return Err(ProtocolError::Allocation(
                constants::ERR_BODY_TOO_LARGE.to_string(),
            ));
        }

        self.reserve_for(total)?;
        self.buf.push(T::TAG.as_byte());
        if prefix_len > 0 {
            self.buf.extend_from_slice(&(data_len as u16).to_le_bytes());
        }
        value.encode(&mut self.buf);
        self.elements += 1;
        Ok(())
    }

    fn cursor(&self) -> ElementCursor<'_> {
        ElementCursor::new(&self.buf, self.cursor)
    }

    fn read<T: Readable>(&mut self) -> Result<T> {
        let mut cursor = ElementCursor::new(&self.buf, self.cursor);
        let value = cursor.read::<T>()?;
        self.cursor = cursor.pos;
        Ok(value)
    }

    fn read_object<T: BinaryObject>(&mut self) -> Result<T> {
        let mut cursor = ElementCursor::new(&self.buf, self.cursor);
        let value = match cursor.take(Tag::Bin)? {
            Some(image) => T::decode(image)?,
            None => T::default(),
        };
        self.cursor = cursor.pos;
        Ok(value)
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        let mut cursor = ElementCursor::new(&self.buf, self.cursor);
        for _ in 0..count {
            // keep progress made before a malformed element
            match cursor.skip_one() {
                Ok(true) => self.cursor = cursor.pos,
                Ok(false) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + varint::encoded_len(self.buf.len() as u32)
            + varint::encoded_len(self.elements)
            + 1
    }

    fn scrub(&mut self) {
        self.buf.zeroize();
        self.elements = 0;
        self.cursor = 0;
    }
}

pub struct Packet {
    opcode: u16,
    id: i64,
    body: RwLock<Body>,
}

impl Packet {
    /// Empty packet ready for writing.
    pub fn new(opcode: u16, id: i64) -> Self {
        Self {
            opcode,
            id,
            body: RwLock::new(Body::with_capacity(DEFAULT_BUFFER_SIZE)),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    /// Decode a packet from a received frame payload, ready for reading.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_PACKET_LEN {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_HEADER));
        }
        let opcode = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut raw_id = [0u8; 8];
        raw_id.copy_from_slice(&bytes[2..FIXED_HEADER_LEN]);
        let id = i64::from_le_bytes(raw_id);

        let mut pos = FIXED_HEADER_LEN;
        let (body_len, used) = varint::read(&bytes[pos..])?;
        pos += used;
        let (elements, used) = varint::read(&bytes[pos..])?;
        pos += used;
        match bytes.get(pos) {
            Some(&HEADER_TERMINATOR) => pos += 1,
            _ => {
                return Err(ProtocolError::InvalidHeader(
                    constants::ERR_MISSING_TERMINATOR,
                ))
            }
        }

        let body_len = body_len as usize;
        let available = bytes.len() - pos;
        if available < body_len {
            return Err(ProtocolError::UnexpectedEof {
                needed: body_len,
                available,
            });
        }
        if available > body_len {
            return Err(ProtocolError::TrailingBytes(available - body_len));
        }

        let body = &bytes[pos..];
        let mut cursor = ElementCursor::new(body, 0);
        let mut found = 0u32;
        while cursor.skip_one()? {
            found += 1;
        }
        if cursor.pos != body.len() {
            return Err(ProtocolError::TrailingBytes(body.len() - cursor.pos));
        }
        if found != elements {
            trace!(claimed = elements, found, "Element count mismatch");
            return Err(ProtocolError::InvalidHeader(constants::ERR_ELEMENT_COUNT));
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(DEFAULT_BUFFER_SIZE.max(body_len))
            .map_err(|e| ProtocolError::Allocation(e.to_string()))?;
        buf.extend_from_slice(&bytes[pos..]);

        Ok(Self {
            opcode,
            id,
            body: RwLock::new(Body {
                buf,
                elements,
                cursor: 0,
            }),
        })
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn element_count(&self) -> u32 {
        self.body.read_scoped().elements
    }

    pub fn body_len(&self) -> usize {
        self.body.read_scoped().buf.len()
    }

    /// Current body buffer capacity.
    pub fn capacity(&self) -> usize {
        self.body.read_scoped().buf.capacity()
    }

    /// Append one element.
    ///
    /// ```rust
    /// # use packetwire::Packet;
    /// # fn main() -> packetwire::error::Result<()> {
    /// let packet = Packet::new(2, 7);
    /// packet.write(true)?.write("user")?.write(42u32)?;
    /// assert_eq!(packet.element_count(), 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn write<T: Writable>(&self, value: T) -> Result<&Self> {
        self.body.write_scoped().append(&value)?;
        Ok(self)
    }

    /// By-value variant of [`Packet::write`].
    pub fn with<T: Writable>(self, value: T) -> Result<Self> {
        self.write(value)?;
        Ok(self)
    }

    /// Append a value object as a `Bin` element.
    pub fn write_object<T: BinaryObject>(&self, value: &T) -> Result<&Self> {
        let mut image = Vec::new();
        value.encode(&mut image);
        let result = self.body.write_scoped().append(image.as_slice());
        image.zeroize();
        result.map(|_| self)
    }

    /// Read the next element as `T`.
    ///
    /// Past the last element this yields `T::default()`. A tag that does not
    /// belong to `T` fails with [`ProtocolError::TypeMismatch`] and leaves the
    /// cursor where it was.
    pub fn read<T: Readable>(&self) -> Result<T> {
        self.body.write_scoped().read()
    }

    pub fn read_object<T: BinaryObject>(&self) -> Result<T> {
        self.body.write_scoped().read_object()
    }

    /// Tag of the next element without consuming it.
    pub fn peek(&self) -> Result<Tag> {
        self.body.read_scoped().cursor().peek()
    }

    pub fn next_is(&self, tag: Tag) -> Result<bool> {
        Ok(self.peek()? == tag)
    }

    /// Advance past `count` elements without decoding them.
    pub fn skip(&self, count: usize) -> Result<()> {
        self.body.write_scoped().skip(count)
    }

    /// Move the cursor back to the first element.
    pub fn rewind(&self) {
        self.body.write_scoped().cursor = 0;
    }

    /// Scrub the body and reuse the packet under a new opcode and id.
    pub fn reset(&mut self, opcode: u16, id: i64) -> &mut Self {
        self.body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .scrub();
        self.opcode = opcode;
        self.id = id;
        self
    }

    /// Length of [`Packet::build`]'s output.
    pub fn size(&self) -> usize {
        let body = self.body.read_scoped();
        body.header_len() + body.buf.len()
    }

    /// Serialize header and body into one buffer.
    pub fn build(&self) -> Vec<u8> {
        let body = self.body.read_scoped();
        let mut out = Vec::with_capacity(body.header_len() + body.buf.len());
        self.put(&body, &mut out);
        out
    }

    /// Serialize into a caller-provided buffer.
    pub fn build_into<B: BufMut>(&self, out: &mut B) {
        let body = self.body.read_scoped();
        self.put(&body, out);
    }

    fn put<B: BufMut + ?Sized>(&self, body: &Body, out: &mut B) {
        out.put_u16_le(self.opcode);
        out.put_i64_le(self.id);
        varint::write(body.buf.len() as u32, out);
        varint::write(body.elements, out);
        out.put_u8(HEADER_TERMINATOR);
        out.put_slice(&body.buf);
    }

    /// Release the packet, scrubbing its buffer.
    pub fn dispose(self) {
        trace!(opcode = self.opcode, id = self.id, "Packet disposed");
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.body
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .scrub();
    }
}

impl Clone for Packet {
    fn clone(&self) -> Self {
        Self {
            opcode: self.opcode,
            id: self.id,
            body: RwLock::new(self.body.read_scoped().clone()),
        }
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.build() == other.build()
    }
}

impl Eq for Packet {}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body.read_scoped();
        f.debug_struct("Packet")
            .field("opcode", &self.opcode)
            .field("id", &self.id)
            .field("element_count", &body.elements)
            .field("body_length", &body.buf.len())
            .field("cursor", &body.cursor)
            .finish()
    }
}

/// Element-by-element dump; the read cursor is left untouched.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body.read_scoped();
        write!(f, "Op: {:04X}, Id: {:016X}", self.opcode, self.id)?;

        let mut cursor = ElementCursor::new(&body.buf, 0);
        let mut index = 1;
        loop {
            let tag = match cursor.peek() {
                Ok(Tag::None) => break,
                Ok(tag) => tag,
                Err(e) => {
                    write!(f, "\n{index:03} <{e}>")?;
                    break;
                }
            };
            match dump_element(&mut cursor, tag) {
                Ok((hex, value)) => {
                    write!(f, "\n{index:03} [{hex:.>32}] {:<8}: {value}", tag.name())?
                }
                Err(e) => {
                    write!(f, "\n{index:03} <{e}>")?;
                    break;
                }
            }
            index += 1;
        }
        Ok(())
    }
}

fn dump_element(cursor: &mut ElementCursor<'_>, tag: Tag) -> Result<(String, String)> {
    Ok(match tag {
        Tag::Byte => {
            let v: u8 = cursor.read()?;
            (format!("{v:02X}"), v.to_string())
        }
        Tag::SByte => {
            let v: i8 = cursor.read()?;
            (format!("{v:02X}"), v.to_string())
        }
        Tag::Bool => {
            let v: bool = cursor.read()?;
            (format!("{:02X}", u8::from(v)), v.to_string())
        }
        Tag::Short => {
            let v: i16 = cursor.read()?;
            (format!("{v:04X}"), v.to_string())
        }
        Tag::UShort => {
            let v: u16 = cursor.read()?;
            (format!("{v:04X}"), v.to_string())
        }
        Tag::Char => {
            let v: char = cursor.read()?;
            (format!("{:04X}", u32::from(v)), v.to_string())
        }
        Tag::Int => {
            let v: i32 = cursor.read()?;
            (format!("{v:08X}"), v.to_string())
        }
        Tag::UInt => {
            let v: u32 = cursor.read()?;
            (format!("{v:08X}"), v.to_string())
        }
        Tag::Long => {
            let v: i64 = cursor.read()?;
            (format!("{v:016X}"), v.to_string())
        }
        Tag::ULong => {
            let v: u64 = cursor.read()?;
            (format!("{v:016X}"), v.to_string())
        }
        Tag::Float => {
            let v: f32 = cursor.read()?;
            (format!("{:08X}", v.to_bits()), v.to_string())
        }
        Tag::Double => {
            let v: f64 = cursor.read()?;
            (format!("{:016X}", v.to_bits()), v.to_string())
        }
        Tag::Decimal => {
            let v: Decimal = cursor.read()?;
            let hex = v.to_le_bytes().iter().rev().fold(String::new(), |mut s, b| {
                let _ = write!(s, "{b:02X}");
                s
            });
            (hex, v.to_string())
        }
        Tag::String => {
            let v: String = cursor.read()?;
            (String::new(), v)
        }
        Tag::Bin => {
            let v: Vec<u8> = cursor.read()?;
            let hex = v
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            (String::new(), hex)
        }
        Tag::None => (String::new(), String::new()),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_reference_layout() {
        let packet = Packet::new(1, 0)
            .with(1u8)
            .and_then(|p| p.with(true))
            .and_then(|p| p.with(-1i16))
            .and_then(|p| p.with("Test"))
            .unwrap();

        let expected: Vec<u8> = vec![
            0x01, 0x00, // opcode
            0, 0, 0, 0, 0, 0, 0, 0,    // id
            0x0E, // body length
            0x04, // element count
            0x00, // terminator
            0x01, 0x01, // Byte 1
            0x0F, 0x01, // Bool true
            0x03, 0xFF, 0xFF, // Short -1
            0x0C, 0x04, 0x00, b'T', b'e', b's', b't', // String "Test"
        ];
        assert_eq!(packet.build(), expected);
        assert_eq!(packet.size(), expected.len());
    }

    #[test]
    fn test_empty_packet_size() {
        let packet = Packet::new(9, -1);
        assert_eq!(packet.size(), MIN_PACKET_LEN);
        assert_eq!(packet.build().len(), MIN_PACKET_LEN);
        assert_eq!(packet.peek().unwrap(), Tag::None);
    }

    #[test]
    fn test_growth_keeps_written_bytes() {
        let packet = Packet::new(3, 3);
        assert!(packet.capacity() >= DEFAULT_BUFFER_SIZE);
        for i in 0..600u32 {
            packet.write(i).unwrap();
        }
        assert_eq!(packet.body_len(), 600 * 5);
        assert!(packet.capacity() >= 3000);

        let parsed = Packet::parse(&packet.build()).unwrap();
        for i in 0..600u32 {
            assert_eq!(parsed.read::<u32>().unwrap(), i);
        }
        assert_eq!(parsed.peek().unwrap(), Tag::None);
    }

    #[test]
    fn test_mismatch_leaves_cursor() {
        let packet = Packet::parse(&Packet::new(1, 1).with(7i32).unwrap().build()).unwrap();
        let err = packet.read::<String>().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TypeMismatch {
                expected: Tag::String,
                found: Tag::Int
            }
        ));
        assert_eq!(packet.peek().unwrap(), Tag::Int);
        assert_eq!(packet.read::<i32>().unwrap(), 7);
    }

    #[test]
    fn test_read_past_end_is_default() {
        let packet = Packet::new(1, 1).with(5u8).unwrap();
        assert_eq!(packet.read::<u8>().unwrap(), 5);
        assert_eq!(packet.read::<u64>().unwrap(), 0);
        assert_eq!(packet.read::<String>().unwrap(), "");
    }

    #[test]
    fn test_oversized_string_rejected() {
        let packet = Packet::new(1, 1);
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        assert!(matches!(
            packet.write(long.as_str()),
            Err(ProtocolError::ElementTooLarge(65_536))
        ));
        assert_eq!(packet.element_count(), 0);
        assert_eq!(packet.body_len(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        let good = Packet::new(4, 4).with(1u16).unwrap().build();

        assert!(matches!(
            Packet::parse(&good[..5]),
            Err(ProtocolError::InvalidHeader(_))
        ));

        let mut no_terminator = good.clone();
        no_terminator[12] = 0x07;
        assert!(matches!(
            Packet::parse(&no_terminator),
            Err(ProtocolError::InvalidHeader(_))
        ));

        assert!(matches!(
            Packet::parse(&good[..good.len() - 1]),
            Err(ProtocolError::UnexpectedEof { .. })
        ));

        let mut trailing = good.clone();
        trailing.push(0);
        assert!(matches!(
            Packet::parse(&trailing),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncated_element_is_eof() {
        // body claims an Int but carries two bytes of it
        let mut bytes = vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 1, 0];
        bytes.extend_from_slice(&[Tag::Int.as_byte(), 0xAA, 0xBB]);
        assert!(matches!(
            Packet::parse(&bytes),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 1, 0, 0x42, 0x00];
        assert!(matches!(
            Packet::parse(&bytes),
            Err(ProtocolError::InvalidTag(0x42))
        ));
    }

    #[test]
    fn test_element_count_must_match_body() {
        // header claims five elements, body holds one Byte
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 5, 0, Tag::Byte.as_byte(), 9];
        let err = Packet::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidHeader(msg) if msg == constants::ERR_ELEMENT_COUNT
        ));
        assert!(err.is_protocol_violation());

        let mut fewer = bytes;
        fewer[11] = 0;
        assert!(Packet::parse(&fewer).is_err());

        let mut exact = bytes;
        exact[11] = 1;
        let packet = Packet::parse(&exact).unwrap();
        assert_eq!(packet.element_count(), 1);
        assert_eq!(packet.read::<u8>().unwrap(), 9);
    }

    #[test]
    fn test_stray_body_byte_rejected() {
        let mut bytes = vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 1, 0];
        bytes.extend_from_slice(&[Tag::Byte.as_byte(), 9, 0x05]);
        assert!(matches!(
            Packet::parse(&bytes),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_reset_reuses_packet() {
        let mut packet = Packet::new(1, 1).with("abc").unwrap();
        packet.reset(8, 99);
        assert_eq!(packet.opcode(), 8);
        assert_eq!(packet.id(), 99);
        assert_eq!(packet.element_count(), 0);
        assert_eq!(packet, Packet::new(8, 99));
    }

    #[test]
    fn test_display_does_not_move_cursor() {
        let packet = Packet::new(0x12, 1)
            .with(255u8)
            .and_then(|p| p.with("hi"))
            .unwrap();
        let dump = packet.to_string();
        assert!(dump.starts_with("Op: 0012, Id: 0000000000000001"));
        assert!(dump.contains("Byte    : 255"));
        assert!(dump.contains("String  : hi"));
        assert_eq!(packet.read::<u8>().unwrap(), 255);
    }

    #[test]
    fn test_clone_is_equal() {
        let packet = Packet::new(5, 6).with(1.25f32).unwrap();
        let copy = packet.clone();
        assert_eq!(packet, copy);
        copy.write(1u8).unwrap();
        assert_ne!(packet, copy);
    }
}
