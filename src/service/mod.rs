//! # Service Layer
//!
//! Server and client glue over the transport and the dispatcher.
//!
//! ## Components
//! - **Server**: accept loop, connection limit, registry upkeep
//! - **Client**: single outbound connection
//! - **Registry**: thread-safe set of live connections
//! - **Router**: frame to packet to dispatcher

pub mod client;
pub mod registry;
pub mod router;
pub mod server;

pub use client::Client;
pub use registry::ConnectionRegistry;
pub use server::Server;
