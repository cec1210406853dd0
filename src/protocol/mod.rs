//! # Protocol Layer
//!
//! Opcode routing for decoded packets.
//!
//! ## Components
//! - **Dispatcher**: opcode to handler table, sole owner of packet disposal
//! - **Opcodes**: well-known opcodes and their log names
//!
//! Handlers only ever borrow a packet; the dispatcher disposes it exactly once
//! after the handler (or the unknown-opcode fallback) returns.

pub mod dispatcher;
pub mod opcodes;


pub use dispatcher::{ConnectionDispatcher, Dispatcher, HandlerTable, Route};
