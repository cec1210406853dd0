//! Frame to packet to handler.

use std::sync::Arc;

use tracing::warn;

use crate::core::packet::Packet;
use crate::protocol::dispatcher::ConnectionDispatcher;
use crate::transport::connection::Connection;
use crate::transport::events::DisconnectReason;

/// Parse a received frame payload and dispatch it.
///
/// An unparseable payload, or a handler failing with a protocol violation,
/// closes the connection with [`DisconnectReason::ProtocolViolation`].
pub fn route_frame(dispatcher: &ConnectionDispatcher, conn: &Arc<Connection>, payload: &[u8]) {
    let packet = match Packet::parse(payload) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(conn = %conn.id(), error = %e, "Unparseable packet");
            conn.metrics().protocol_error();
            conn.close(DisconnectReason::ProtocolViolation);
            return;
        }
    };

    if let Err(e) = dispatcher.handle(conn, packet) {
        if e.is_protocol_violation() {
            conn.metrics().protocol_error();
            conn.close(DisconnectReason::ProtocolViolation);
        }
    }
}
