//! # Error Types
//!
//! Error handling for the packet codec, the framed transport and the dispatcher.
//!
//! ## Error Categories
//! - **Protocol violations**: tag mismatches, malformed varints, reads past the
//!   declared body, bad frame lengths. The stream can no longer be parsed, so
//!   the owning connection is usually dropped.
//! - **Transport errors**: socket failures and timeouts. They are absorbed at the
//!   transport boundary and turned into a `Disconnected` notification.
//! - **Cipher errors**: encode/decode failures from an attached cipher.
//! - **Configuration errors**: invalid or unreadable configuration.
//!
//! ## Example Usage
//! ```rust
//! use packetwire::error::{ProtocolError, Result};
//! use packetwire::Packet;
//! use tracing::{error, info};
//!
//! fn first_byte(bytes: &[u8]) -> Result<u8> {
//!     let packet = Packet::parse(bytes)?;
//!     packet.read::<u8>()
//! }
//!
//! match first_byte(&[0u8; 3]) {
//!     Ok(value) => info!(value, "Read first element"),
//!     Err(e @ ProtocolError::InvalidHeader(_)) => error!(error = %e, "Bad header"),
//!     Err(e) => error!(error = %e, "Read failed"),
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::core::element::Tag;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Header validation errors
    pub const ERR_SHORT_HEADER: &str = "packet shorter than fixed header";
    pub const ERR_MISSING_TERMINATOR: &str = "header terminator byte missing";
    pub const ERR_BODY_TOO_LARGE: &str = "body length exceeds u32 range";
    pub const ERR_ELEMENT_COUNT: &str = "element count does not match body";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Connection is not established";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_CIPHER_DISPOSED: &str = "Cipher already disposed";
    pub const ERR_RANDOM_SOURCE: &str = "System random source unavailable";
}

// ProtocolError is the primary error type for all crate operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: Tag, found: Tag },

    #[error("Invalid element tag: {0:#04x}")]
    InvalidTag(u8),

    #[error("Malformed varint")]
    MalformedVarint,

    #[error("Read past end of body: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("Invalid packet header: {0}")]
    InvalidHeader(&'static str),

    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),

    #[error("Invalid UTF-16 code unit: {0:#06x}")]
    InvalidChar(u16),

    #[error("Invalid UTF-8 in string element")]
    InvalidUtf8,

    #[error("Invalid decimal encoding")]
    InvalidDecimal,

    #[error("Invalid value object: {0}")]
    InvalidObject(String),

    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(usize),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Element too large: {0} bytes (max 65535)")]
    ElementTooLarge(usize),

    #[error("Buffer allocation failed: {0}")]
    Allocation(String),

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("Timeout occurred")]
    Timeout,

    #[error("{}", constants::ERR_ENCRYPTION_FAILED)]
    EncryptionFailure,

    #[error("{}", constants::ERR_DECRYPTION_FAILED)]
    DecryptionFailure,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// The byte stream can no longer be parsed; the peer should be dropped.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::TypeMismatch { .. }
                | ProtocolError::InvalidTag(_)
                | ProtocolError::MalformedVarint
                | ProtocolError::UnexpectedEof { .. }
                | ProtocolError::InvalidHeader(_)
                | ProtocolError::TrailingBytes(_)
                | ProtocolError::InvalidChar(_)
                | ProtocolError::InvalidUtf8
                | ProtocolError::InvalidDecimal
                | ProtocolError::InvalidObject(_)
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::OversizedFrame(_)
        )
    }

    /// Socket-level failure; always ends the connection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::NotConnected | ProtocolError::Timeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_classification() {
        let mismatch = ProtocolError::TypeMismatch {
            expected: Tag::Int,
            found: Tag::String,
        };
        assert!(mismatch.is_protocol_violation());
        assert!(!mismatch.is_transport());

        let io = ProtocolError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.is_transport());
        assert!(!io.is_protocol_violation());

        assert!(!ProtocolError::EncryptionFailure.is_protocol_violation());
        assert!(!ProtocolError::EncryptionFailure.is_transport());
    }

    #[test]
    fn test_mismatch_message_names_both_tags() {
        let err = ProtocolError::TypeMismatch {
            expected: Tag::Short,
            found: Tag::Bool,
        };
        assert_eq!(err.to_string(), "Type mismatch: expected Short, got Bool");
    }

    #[test]
    fn test_messages_follow_constants() {
        assert_eq!(
            ProtocolError::NotConnected.to_string(),
            constants::ERR_NOT_CONNECTED
        );
        assert!(ProtocolError::NotConnected.is_transport());
        assert_eq!(
            ProtocolError::DecryptionFailure.to_string(),
            constants::ERR_DECRYPTION_FAILED
        );
        assert_eq!(
            ProtocolError::InvalidHeader(constants::ERR_ELEMENT_COUNT).to_string(),
            format!("Invalid packet header: {}", constants::ERR_ELEMENT_COUNT)
        );
    }
}
