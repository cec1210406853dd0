//! # Server
//!
//! Accepts TCP peers, keeps them in a [`ConnectionRegistry`] and routes their
//! frames to a shared dispatcher.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::ConnectionDispatcher;
use crate::service::registry::ConnectionRegistry;
use crate::service::router::route_frame;
use crate::transport::connection::Connection;
use crate::transport::events::{ConnectedFn, DisconnectReason, DisconnectedFn, Observers};
use crate::utils::metrics::{global_metrics, Metrics};
use crate::utils::sync::MutexExt;

struct Running {
    addr: SocketAddr,
    shutdown: mpsc::Sender<()>,
}

/// Shared by the accept loop and every accepted connection's observers.
#[derive(Clone)]
struct Acceptor {
    config: Arc<NetworkConfig>,
    dispatcher: Arc<ConnectionDispatcher>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    client_connected: Arc<Observers<ConnectedFn>>,
    client_disconnected: Arc<Observers<DisconnectedFn>>,
}

pub struct Server {
    acceptor: Acceptor,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn new(config: NetworkConfig, dispatcher: Arc<ConnectionDispatcher>) -> Self {
        Self::with_metrics(config, dispatcher, global_metrics())
    }

    pub fn with_metrics(
        config: NetworkConfig,
        dispatcher: Arc<ConnectionDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            acceptor: Acceptor {
                config: Arc::new(config),
                dispatcher,
                registry: Arc::new(ConnectionRegistry::new()),
                metrics,
                client_connected: Arc::new(Observers::new()),
                client_disconnected: Arc::new(Observers::new()),
            },
            running: Mutex::new(None),
        }
    }

    /// Bind and start accepting. Returns the bound address.
    ///
    /// Starting a running server logs a warning and returns its address.
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self), fields(address = %self.acceptor.config.server.address))]
    pub fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock_scoped();
        if let Some(state) = running.as_ref() {
            warn!(bound = %state.addr, "Server already started");
            return Ok(state.addr);
        }

        let listener = bind(&self.acceptor.config)?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(accept_loop(listener, shutdown_rx, self.acceptor.clone()));

        *running = Some(Running {
            addr,
            shutdown: shutdown_tx,
        });
        info!(bound = %addr, "Server ready");
        Ok(addr)
    }

    /// Stop accepting and disconnect every client.
    pub fn stop(&self) {
        let Some(state) = self.running.lock_scoped().take() else {
            warn!("Server is not running");
            return;
        };
        let _ = state.shutdown.try_send(());

        let clients = self.acceptor.registry.snapshot();
        for conn in &clients {
            conn.close(DisconnectReason::ServerStopped);
        }
        info!(address = %state.addr, clients = clients.len(), "Server stopped");
        self.acceptor.metrics.log_metrics();
    }

    pub fn is_running(&self) -> bool {
        self.running.lock_scoped().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock_scoped().as_ref().map(|state| state.addr)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.acceptor.registry
    }

    pub fn dispatcher(&self) -> &Arc<ConnectionDispatcher> {
        &self.acceptor.dispatcher
    }

    /// Send `packet` to every connected client.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        self.acceptor.registry.broadcast(packet)
    }

    pub fn on_client_connected<F>(&self, observer: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.acceptor.client_connected.subscribe(Arc::new(observer));
    }

    pub fn on_client_disconnected<F>(&self, observer: F)
    where
        F: Fn(&Arc<Connection>, DisconnectReason) + Send + Sync + 'static,
    {
        self.acceptor.client_disconnected.subscribe(Arc::new(observer));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(state) = self.running.lock_scoped().take() {
            let _ = state.shutdown.try_send(());
        }
    }
}

fn bind(config: &NetworkConfig) -> Result<TcpListener> {
    let addr: SocketAddr = config.server.address.parse().map_err(|e| {
        ProtocolError::ConfigError(format!(
            "Invalid server address '{}': {e}",
            config.server.address
        ))
    })?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_nodelay(config.server.nodelay)?;
    socket.bind(addr)?;
    Ok(socket.listen(config.server.backlog)?)
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    acceptor: Acceptor,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => acceptor.admit(stream, peer),
                Err(e) => {
                    acceptor.metrics.connection_error();
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
}

impl Acceptor {
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let limit = self.config.server.max_connections;
        if self.registry.len() >= limit {
            self.metrics.connection_refused();
            warn!(peer = %peer, limit, "Connection refused: limit reached");
            return;
        }
        if self.config.server.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let conn = Connection::with_metrics(&self.config, Arc::clone(&self.metrics));

        let registry = Arc::clone(&self.registry);
        let connected = Arc::clone(&self.client_connected);
        conn.on_connected(move |conn| {
            registry.add(conn);
            for observer in connected.snapshot() {
                observer(conn);
            }
        });

        let registry = Arc::clone(&self.registry);
        let disconnected = Arc::clone(&self.client_disconnected);
        conn.on_disconnected(move |conn, reason| {
            registry.remove(conn.id());
            for observer in disconnected.snapshot() {
                observer(conn, reason);
            }
        });

        let dispatcher = Arc::clone(&self.dispatcher);
        conn.on_frame(move |conn, payload| route_frame(&dispatcher, conn, payload));

        conn.attach(stream, peer.to_string());
    }
}
