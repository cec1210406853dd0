//! Thread-safe set of live connections.

use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::core::packet::Packet;
use crate::transport::connection::{Connection, ConnectionId};
use crate::utils::sync::RwLockExt;

/// Ordered by insertion; each connection appears at most once.
///
/// Add and remove take the exclusive lock, iteration the shared one. A
/// [`ConnectionRegistry::for_each`] closure must not disconnect: removal would
/// need the exclusive lock the iteration is holding. Take a
/// [`ConnectionRegistry::snapshot`] first instead.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection is already present.
    pub fn add(&self, conn: &Arc<Connection>) -> bool {
        let mut connections = self.connections.write_scoped();
        if connections.iter().any(|c| c.id() == conn.id()) {
            trace!(conn = %conn.id(), "Connection already registered");
            return false;
        }
        connections.push(Arc::clone(conn));
        debug!(conn = %conn.id(), total = connections.len(), "Connection registered");
        true
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write_scoped();
        let index = connections.iter().position(|c| c.id() == id)?;
        let removed = connections.remove(index);
        debug!(conn = %id, total = connections.len(), "Connection unregistered");
        Some(removed)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read_scoped().iter().any(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.connections.read_scoped().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in self.connections.read_scoped().iter() {
            f(conn);
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read_scoped().clone()
    }

    /// Send `packet` to every registered connection; returns how many were sent to.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let bytes = packet.build();
        let mut sent = 0;
        self.for_each(|conn| {
            conn.send(bytes.clone());
            sent += 1;
        });
        sent
    }
}
