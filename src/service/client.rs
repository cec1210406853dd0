//! # Client
//!
//! A single outbound connection whose frames are routed to a dispatcher.

use std::sync::Arc;

use tracing::instrument;

use crate::config::NetworkConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::ConnectionDispatcher;
use crate::service::router::route_frame;
use crate::transport::cipher::Cipher;
use crate::transport::connection::Connection;
use crate::utils::metrics::{global_metrics, Metrics};

pub struct Client {
    config: NetworkConfig,
    connection: Arc<Connection>,
}

impl Client {
    pub fn new(config: NetworkConfig, dispatcher: Arc<ConnectionDispatcher>) -> Self {
        Self::with_metrics(config, dispatcher, global_metrics())
    }

    pub fn with_metrics(
        config: NetworkConfig,
        dispatcher: Arc<ConnectionDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let connection = Connection::with_metrics(&config, metrics);
        connection.on_frame(move |conn, payload| route_frame(&dispatcher, conn, payload));
        Self { config, connection }
    }

    /// Connect to `host:port`; returns whether the connection is up afterwards.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        self.connection.connect(host, port).await.is_connected()
    }

    /// Connect to the configured `client.address`.
    #[instrument(skip(self), fields(address = %self.config.client.address))]
    pub async fn connect_configured(&self) -> Result<bool> {
        let (host, port) = split_address(&self.config.client.address)?;
        Ok(self.connect(host, port).await)
    }

    pub fn send(&self, packet: &Packet) {
        self.connection.send_packet(packet);
    }

    pub fn set_cipher(&self, cipher: Box<dyn Cipher>) {
        self.connection.set_cipher(cipher);
    }

    pub fn disconnect(&self) -> bool {
        self.connection.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

fn split_address(address: &str) -> Result<(&str, u16)> {
    let invalid = || ProtocolError::ConfigError(format!("Invalid client address: '{address}'"));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    // bracketed IPv6 literal
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("127.0.0.1:9000").unwrap(), ("127.0.0.1", 9000));
        assert_eq!(split_address("[::1]:80").unwrap(), ("::1", 80));
        assert_eq!(split_address("example.com:8080").unwrap(), ("example.com", 8080));
        assert!(split_address("nohost").is_err());
        assert!(split_address(":9000").is_err());
        assert!(split_address("host:port").is_err());
    }
}
