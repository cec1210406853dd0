//! Well-known opcodes.
//!
//! Opcodes above [`LOGIN`] are application-defined.

pub const HANDSHAKE: u16 = 0;
pub const KEEPALIVE: u16 = 1;
pub const LOGIN: u16 = 2;

/// Name for logs; `"<unknown>"` for application opcodes.
pub fn name(opcode: u16) -> &'static str {
    match opcode {
        HANDSHAKE => "HANDSHAKE",
        KEEPALIVE => "KEEPALIVE",
        LOGIN => "LOGIN",
        _ => "<unknown>",
    }
}
