//! 128-bit decimal element.
//!
//! A 96-bit unsigned mantissa, a power-of-ten scale in `0..=28` and a sign,
//! stored as four little-endian `u32` words `lo, mid, hi, flags`. The flags word
//! carries the scale in bits 16..24 and the sign in bit 31; every other bit is
//! zero. The crate only moves these values across the wire, it does no arithmetic.

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Largest scale a decimal may carry.
pub const MAX_SCALE: u32 = 28;

const SCALE_SHIFT: u32 = 16;
const SCALE_MASK: u32 = 0x00FF_0000;
const SIGN_MASK: u32 = 0x8000_0000;
const MANTISSA_LIMIT: u128 = 1 << 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    lo: u32,
    mid: u32,
    hi: u32,
    flags: u32,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal {
        lo: 0,
        mid: 0,
        hi: 0,
        flags: 0,
    };

    /// 79228162514264337593543950335
    pub const MAX: Decimal = Decimal {
        lo: u32::MAX,
        mid: u32::MAX,
        hi: u32::MAX,
        flags: 0,
    };

    /// -79228162514264337593543950335
    pub const MIN: Decimal = Decimal {
        lo: u32::MAX,
        mid: u32::MAX,
        hi: u32::MAX,
        flags: SIGN_MASK,
    };

    /// Build `mantissa * 10^-scale`.
    ///
    /// Fails when `|mantissa|` needs more than 96 bits or the scale exceeds 28.
    pub fn new(mantissa: i128, scale: u32) -> Result<Self> {
        let magnitude = mantissa.unsigned_abs();
        if magnitude >= MANTISSA_LIMIT || scale > MAX_SCALE {
            return Err(ProtocolError::InvalidDecimal);
        }
        let mut flags = scale << SCALE_SHIFT;
        if mantissa < 0 {
            flags |= SIGN_MASK;
        }
        Ok(Self {
            lo: magnitude as u32,
            mid: (magnitude >> 32) as u32,
            hi: (magnitude >> 64) as u32,
            flags,
        })
    }

    pub fn mantissa(&self) -> i128 {
        let magnitude = (u128::from(self.hi) << 64)
            | (u128::from(self.mid) << 32)
            | u128::from(self.lo);
        // below 2^96, always fits
        let value = magnitude as i128;
        if self.is_sign_negative() {
            -value
        } else {
            value
        }
    }

    pub fn scale(&self) -> u32 {
        (self.flags & SCALE_MASK) >> SCALE_SHIFT
    }

    pub fn is_sign_negative(&self) -> bool {
        self.flags & SIGN_MASK != 0
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.lo.to_le_bytes());
        out[4..8].copy_from_slice(&self.mid.to_le_bytes());
        out[8..12].copy_from_slice(&self.hi.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Parse the wire image, rejecting reserved flag bits and oversized scales.
    pub fn from_le_bytes(bytes: [u8; 16]) -> Result<Self> {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let flags = word(12);
        if flags & !(SCALE_MASK | SIGN_MASK) != 0 || (flags & SCALE_MASK) >> SCALE_SHIFT > MAX_SCALE
        {
            return Err(ProtocolError::InvalidDecimal);
        }
        Ok(Self {
            lo: word(0),
            mid: word(4),
            hi: word(8),
            flags,
        })
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        let magnitude = u128::from(value.unsigned_abs());
        Self {
            lo: magnitude as u32,
            mid: (magnitude >> 32) as u32,
            hi: 0,
            flags: if value < 0 { SIGN_MASK } else { 0 },
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa().unsigned_abs().to_string();
        let scale = self.scale() as usize;
        let sign = if self.is_sign_negative() && self.mantissa() != 0 {
            "-"
        } else {
            ""
        };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}
