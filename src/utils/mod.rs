//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, locking and timing.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 frame cipher
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Sync**: Poison-tolerant scoped lock guards
//! - **Timeout**: Async timeout wrappers

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod sync;
pub mod timeout;
