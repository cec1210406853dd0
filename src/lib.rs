//! # packetwire
//!
//! A small client/server networking stack built around a self-describing,
//! tagged binary packet format.
//!
//! ## Layers
//! - [`core`]: packet codec (typed element writes and reads, varint header)
//!   and length-prefixed frame codec
//! - [`transport`]: per-connection lifecycle, reader and writer tasks,
//!   pluggable cipher, ordered observers
//! - [`protocol`]: opcode dispatcher, the only place packets are disposed
//! - [`service`]: server accept loop, client, connection registry
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging,
//!   metrics and crypto
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use packetwire::config::NetworkConfig;
//! use packetwire::protocol::{opcodes, ConnectionDispatcher};
//! use packetwire::{Packet, Server};
//!
//! # async fn run() -> packetwire::Result<()> {
//! let dispatcher = Arc::new(ConnectionDispatcher::new());
//! dispatcher.register(opcodes::LOGIN, |conn, packet| {
//!     let user: String = packet.read()?;
//!     conn.send_packet(&Packet::new(opcodes::LOGIN, packet.id()).with(user)?);
//!     Ok(())
//! });
//!
//! let server = Server::new(NetworkConfig::default(), dispatcher);
//! let addr = server.start()?;
//! println!("listening on {addr}");
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::decimal::Decimal;
pub use crate::core::element::{BinaryObject, Readable, Tag, Writable};
pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::{ConnectionDispatcher, Dispatcher, HandlerTable, Route};
pub use crate::service::{Client, ConnectionRegistry, Server};
pub use crate::transport::{Cipher, Connection, ConnectionId, DisconnectReason};
