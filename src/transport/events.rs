//! Ordered observer lists for connection events.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::transport::connection::Connection;
use crate::utils::sync::MutexExt;

/// Why a connection went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Local `disconnect()` call
    Requested,
    /// Peer closed its end (EOF)
    PeerClosed,
    /// Socket error or send timeout
    TransportError,
    /// Bad frame, failed decryption or unparseable packet
    ProtocolViolation,
    /// No complete frame within the read-idle window
    IdleTimeout,
    ServerStopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::PeerClosed => "peer closed",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::IdleTimeout => "idle timeout",
            DisconnectReason::ServerStopped => "server stopped",
        })
    }
}

pub type ConnectedFn = dyn Fn(&Arc<Connection>) + Send + Sync;
pub type DisconnectedFn = dyn Fn(&Arc<Connection>, DisconnectReason) + Send + Sync;
/// Receives each decrypted frame payload.
pub type FrameFn = dyn Fn(&Arc<Connection>, &[u8]) + Send + Sync;
pub type CleanupFn = dyn Fn(&Arc<Connection>) + Send + Sync;

/// Observers are invoked in registration order from a snapshot, so a callback
/// may subscribe further observers without deadlocking.
pub struct Observers<F: ?Sized> {
    list: Mutex<Vec<Arc<F>>>,
}

impl<F: ?Sized> Observers<F> {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<F>) {
        self.list.lock_scoped().push(observer);
    }

    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.list.lock_scoped().clone()
    }

    pub fn len(&self) -> usize {
        self.list.lock_scoped().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self::new()
    }
}
