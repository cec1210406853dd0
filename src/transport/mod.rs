//! # Transport Layer
//!
//! Framed TCP sessions.
//!
//! ## Components
//! - **Connection**: per-peer lifecycle, reader and writer tasks, send path
//! - **Cipher**: pluggable per-connection frame transform
//! - **Events**: ordered observer lists and disconnect reasons
//!
//! Each connection reads with exactly one outstanding read: every complete
//! frame in the buffer is handed to observers before the next read starts, so
//! frames from one peer are always handled in arrival order.

pub mod cipher;
pub mod connection;
pub mod events;

pub use cipher::Cipher;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use events::DisconnectReason;
