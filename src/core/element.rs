//! # Packet Elements
//!
//! Every value in a packet body is an *element*: a one-byte [`Tag`] followed by
//! the value's payload.
//!
//! ## Layouts
//! ```text
//! fixed:    [Tag(1)] [little-endian value (1/2/4/8/16 bytes)]
//! variable: [Tag(1)] [Length(2, LE)] [raw bytes]        (String, Bin)
//! ```
//!
//! [`Writable`] and [`Readable`] give each supported Rust type an explicit
//! encode/decode contract. Application structs go through [`BinaryObject`], which
//! maps a value to a flat byte image carried as a `Bin` element.

use std::fmt;

use crate::core::decimal::Decimal;
use crate::error::{ProtocolError, Result};

/// Bytes taken by the length prefix of variable-length elements.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Wire tag preceding every element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Terminal sentinel, never written
    None = 0,
    Byte = 1,
    SByte = 2,
    Short = 3,
    UShort = 4,
    Int = 5,
    UInt = 6,
    Long = 7,
    ULong = 8,
    Float = 9,
    Double = 10,
    Decimal = 11,
    String = 12,
    Char = 13,
    Bin = 14,
    Bool = 15,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Tag::None,
            1 => Tag::Byte,
            2 => Tag::SByte,
            3 => Tag::Short,
            4 => Tag::UShort,
            5 => Tag::Int,
            6 => Tag::UInt,
            7 => Tag::Long,
            8 => Tag::ULong,
            9 => Tag::Float,
            10 => Tag::Double,
            11 => Tag::Decimal,
            12 => Tag::String,
            13 => Tag::Char,
            14 => Tag::Bin,
            15 => Tag::Bool,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Payload width of fixed-size elements, `None` for variable ones.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::None => Some(0),
            Tag::Byte | Tag::SByte | Tag::Bool => Some(1),
            Tag::Short | Tag::UShort | Tag::Char => Some(2),
            Tag::Int | Tag::UInt | Tag::Float => Some(4),
            Tag::Long | Tag::ULong | Tag::Double => Some(8),
            Tag::Decimal => Some(16),
            Tag::String | Tag::Bin => None,
        }
    }

    pub fn is_variable(self) -> bool {
        self.fixed_width().is_none()
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::None => "None",
            Tag::Byte => "Byte",
            Tag::SByte => "SByte",
            Tag::Short => "Short",
            Tag::UShort => "UShort",
            Tag::Int => "Int",
            Tag::UInt => "UInt",
            Tag::Long => "Long",
            Tag::ULong => "ULong",
            Tag::Float => "Float",
            Tag::Double => "Double",
            Tag::Decimal => "Decimal",
            Tag::String => "String",
            Tag::Char => "Char",
            Tag::Bin => "Bin",
            Tag::Bool => "Bool",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value that can be appended to a packet body.
pub trait Writable {
    const TAG: Tag;

    /// Payload bytes, excluding the tag and any length prefix.
    fn payload_len(&self) -> usize;

    fn encode(&self, out: &mut Vec<u8>);
}

/// A value that can be read back from a packet body.
///
/// `Default` supplies the value returned when reading past the last element.
pub trait Readable: Writable + Default + Sized {
    /// `payload` is exactly the element's data: the fixed width for fixed tags,
    /// the bytes after the length prefix for variable ones.
    fn decode(payload: &[u8]) -> Result<Self>;
}

/// Explicit flat-image contract for application structs carried as `Bin`.
///
/// ```rust
/// use packetwire::core::element::BinaryObject;
/// use packetwire::error::{ProtocolError, Result};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Position { id: i64, x: u8, y: u8 }
///
/// impl BinaryObject for Position {
///     fn encode(&self, out: &mut Vec<u8>) {
///         out.extend_from_slice(&self.id.to_le_bytes());
///         out.push(self.x);
///         out.push(self.y);
///     }
///
///     fn decode(bytes: &[u8]) -> Result<Self> {
///         let raw: [u8; 10] = bytes
///             .try_into()
///             .map_err(|_| ProtocolError::InvalidObject("position is 10 bytes".into()))?;
///         let mut id = [0u8; 8];
///         id.copy_from_slice(&raw[..8]);
///         Ok(Self { id: i64::from_le_bytes(id), x: raw[8], y: raw[9] })
///     }
/// }
/// ```
pub trait BinaryObject: Default + Sized {
    fn encode(&self, out: &mut Vec<u8>);

    fn decode(bytes: &[u8]) -> Result<Self>;
}

macro_rules! fixed_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Writable for $ty {
                const TAG: Tag = Tag::$tag;

                #[inline]
                fn payload_len(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }

                #[inline]
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Readable for $ty {
                #[inline]
                fn decode(payload: &[u8]) -> Result<Self> {
                    let raw = payload.try_into().map_err(|_| ProtocolError::UnexpectedEof {
                        needed: std::mem::size_of::<$ty>(),
                        available: payload.len(),
                    })?;
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

fixed_element! {
    u8 => Byte,
    i8 => SByte,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

impl Writable for bool {
    const TAG: Tag = Tag::Bool;

    fn payload_len(&self) -> usize {
        1
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Readable for bool {
    fn decode(payload: &[u8]) -> Result<Self> {
        match payload {
            [byte] => Ok(*byte != 0),
            _ => Err(ProtocolError::UnexpectedEof {
                needed: 1,
                available: payload.len(),
            }),
        }
    }
}

/// Single UTF-16 code unit; scalars outside the BMP become U+FFFD.
impl Writable for char {
    const TAG: Tag = Tag::Char;

    fn payload_len(&self) -> usize {
        2
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let unit = u16::try_from(u32::from(*self)).unwrap_or(0xFFFD);
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

impl Readable for char {
    fn decode(payload: &[u8]) -> Result<Self> {
        let unit = u16::decode(payload)?;
        char::from_u32(u32::from(unit)).ok_or(ProtocolError::InvalidChar(unit))
    }
}

impl Writable for Decimal {
    const TAG: Tag = Tag::Decimal;

    fn payload_len(&self) -> usize {
        16
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Readable for Decimal {
    fn decode(payload: &[u8]) -> Result<Self> {
        let raw: [u8; 16] = payload
            .try_into()
            .map_err(|_| ProtocolError::UnexpectedEof {
                needed: 16,
                available: payload.len(),
            })?;
        Decimal::from_le_bytes(raw)
    }
}

impl Writable for str {
    const TAG: Tag = Tag::String;

    fn payload_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl Writable for String {
    const TAG: Tag = Tag::String;

    fn payload_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl Readable for String {
    fn decode(payload: &[u8]) -> Result<Self> {
        std::str::from_utf8(payload)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

impl Writable for [u8] {
    const TAG: Tag = Tag::Bin;

    fn payload_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Writable for Vec<u8> {
    const TAG: Tag = Tag::Bin;

    fn payload_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Readable for Vec<u8> {
    fn decode(payload: &[u8]) -> Result<Self> {
        Ok(payload.to_vec())
    }
}

impl<T: Writable + ?Sized> Writable for &T {
    const TAG: Tag = T::TAG;

    fn payload_len(&self) -> usize {
        (**self).payload_len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        (**self).encode(out)
    }
}
