//! # Connection
//!
//! One TCP peer: a framed reader task, a writer task fed by an outbound queue,
//! an optional cipher and ordered observer lists.
//!
//! ```text
//! Disconnected --connect()/attach()--> Connected --disconnect() | error--> Disconnected
//! ```
//!
//! A connection is shared as `Arc<Connection>`. It is `Connected` exactly while
//! a session (reader task plus outbound queue) is installed. Each session
//! carries a generation; its tasks can only tear down their own generation, so
//! a stale writer or reader never closes a later session. Teardown happens
//! once per session: the queue closes (the writer flushes what is queued, then
//! shuts its half down), the reader is aborted, the cipher is disposed, cleanup
//! hooks run and disconnect observers fire with a [`DisconnectReason`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, trace, warn};
use zeroize::Zeroize;

use crate::config::{NetworkConfig, TransportConfig};
use crate::core::codec::{FrameCodec, FRAME_HEADER_LEN};
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::cipher::Cipher;
use crate::transport::events::{
    CleanupFn, ConnectedFn, DisconnectReason, DisconnectedFn, FrameFn, Observers,
};
use crate::utils::metrics::{global_metrics, Metrics};
use crate::utils::sync::MutexExt;
use crate::utils::timeout::with_timeout_error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

pub struct Connection {
    id: ConnectionId,
    transport: TransportConfig,
    connect_timeout: Duration,
    metrics: Arc<Metrics>,
    generations: AtomicU64,
    session: Mutex<Option<Session>>,
    cipher: Mutex<Option<Box<dyn Cipher>>>,
    peer: Mutex<Option<String>>,
    on_connected: Observers<ConnectedFn>,
    on_disconnected: Observers<DisconnectedFn>,
    on_frame: Observers<FrameFn>,
    on_cleanup: Observers<CleanupFn>,
}

impl Connection {
    pub fn new(config: &NetworkConfig) -> Arc<Self> {
        Self::with_metrics(config, global_metrics())
    }

    pub fn with_metrics(config: &NetworkConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            transport: config.transport.clone(),
            connect_timeout: config.client.connection_timeout,
            metrics,
            generations: AtomicU64::new(0),
            session: Mutex::new(None),
            cipher: Mutex::new(None),
            peer: Mutex::new(None),
            on_connected: Observers::new(),
            on_disconnected: Observers::new(),
            on_frame: Observers::new(),
            on_cleanup: Observers::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.lock_scoped().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock_scoped()
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    /// Remote address of the current or last session.
    pub fn address(&self) -> String {
        self.peer
            .lock_scoped()
            .clone()
            .unwrap_or_else(|| String::from("<unknown>"))
    }

    /// Attach a cipher; it applies to every frame sent or received afterwards.
    pub fn set_cipher(&self, cipher: Box<dyn Cipher>) {
        if let Some(mut old) = self.cipher.lock_scoped().replace(cipher) {
            old.dispose();
        }
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.lock_scoped().is_some()
    }

    pub fn on_connected<F>(&self, observer: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_connected.subscribe(Arc::new(observer));
    }

    pub fn on_disconnected<F>(&self, observer: F)
    where
        F: Fn(&Arc<Connection>, DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnected.subscribe(Arc::new(observer));
    }

    /// Observe each received frame payload, after decryption.
    pub fn on_frame<F>(&self, observer: F)
    where
        F: Fn(&Arc<Connection>, &[u8]) + Send + Sync + 'static,
    {
        self.on_frame.subscribe(Arc::new(observer));
    }

    /// Hook run during teardown, before disconnect observers.
    pub fn on_cleanup<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_cleanup.subscribe(Arc::new(hook));
    }

    /// Open a TCP session to `host:port`.
    ///
    /// Failures are logged and leave the connection disconnected.
    #[instrument(skip(self), fields(conn = %self.id))]
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16) -> Arc<Self> {
        if self.is_connected() {
            warn!("Connection already established");
            return Arc::clone(self);
        }

        let target = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let attempt = with_timeout_error(
            async { Ok(TcpStream::connect(&target).await?) },
            self.connect_timeout,
        )
        .await;

        match attempt {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| target.clone());
                self.attach(stream, peer);
            }
            Err(e) => {
                self.metrics.connection_error();
                error!(addr = %target, error = %e, "Connection attempt failed");
            }
        }
        Arc::clone(self)
    }

    /// Start a session over an established stream.
    ///
    /// Returns `false` without touching `stream` state if a session is live.
    pub fn attach<S>(self: &Arc<Self>, stream: S, peer: impl Into<String>) -> bool
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let ready = {
            let mut slot = self.session.lock_scoped();
            if slot.is_some() {
                warn!(conn = %self.id, peer = %peer, "Connection already attached");
                return false;
            }

            let (read_half, write_half) = tokio::io::split(stream);
            let codec = FrameCodec::new(self.transport.max_frame_size);
            let frames = FramedRead::with_capacity(
                read_half,
                codec,
                self.transport.read_buffer_capacity,
            );
            let sink = FramedWrite::new(write_half, codec);
            let (outbound, queue) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);

            let reader = tokio::spawn(read_loop(
                Arc::clone(self),
                generation,
                frames,
                ready_rx,
                self.transport.read_idle_timeout,
            ));
            tokio::spawn(write_loop(
                Arc::clone(self),
                generation,
                sink,
                queue,
                self.transport.send_timeout,
            ));

            *self.peer.lock_scoped() = Some(peer);
            *slot = Some(Session {
                generation,
                outbound,
                reader,
            });
            ready_tx
        };

        self.metrics.connection_established();
        info!(conn = %self.id, peer = %self.address(), "Connection established");
        for observer in self.on_connected.snapshot() {
            observer(self);
        }
        // frames are delivered only after connect observers ran
        let _ = ready.send(());
        true
    }

    /// Queue `data` as one frame. Does nothing while disconnected.
    ///
    /// With a cipher attached the payload is encoded first; encoding and
    /// queueing happen under one lock, so frames leave in encode order.
    pub fn send(&self, mut data: Vec<u8>) {
        let session = self.session.lock_scoped();
        let Some(session) = session.as_ref() else {
            trace!(conn = %self.id, error = %ProtocolError::NotConnected, "Send dropped");
            data.zeroize();
            return;
        };

        if let Some(cipher) = self.cipher.lock_scoped().as_mut() {
            let result = cipher.encode(&mut data);
            self.metrics.encryption(result.is_ok());
            if let Err(e) = result {
                error!(conn = %self.id, error = %e, "Unable to encode frame");
                data.zeroize();
                return;
            }
        }

        if let Err(mpsc::error::SendError(mut rejected)) = session.outbound.send(data) {
            debug!(conn = %self.id, "Outbound queue closed");
            rejected.zeroize();
        }
    }

    pub fn send_packet(&self, packet: &Packet) {
        self.send(packet.build());
    }

    /// Tear the session down. A second call logs a warning and returns `false`.
    pub fn disconnect(self: &Arc<Self>) -> bool {
        if self.close(DisconnectReason::Requested) {
            true
        } else {
            warn!(conn = %self.id, peer = %self.address(), "Connection disconnected multiple times");
            false
        }
    }

    pub(crate) fn close(self: &Arc<Self>, reason: DisconnectReason) -> bool {
        let Some(session) = self.session.lock_scoped().take() else {
            return false;
        };
        self.teardown(session, reason);
        true
    }

    /// Close only if `generation` is still the installed session.
    fn close_session(self: &Arc<Self>, generation: u64, reason: DisconnectReason) -> bool {
        let session = {
            let mut slot = self.session.lock_scoped();
            if slot.as_ref().is_some_and(|s| s.generation == generation) {
                slot.take()
            } else {
                None
            }
        };
        match session {
            Some(session) => {
                self.teardown(session, reason);
                true
            }
            None => {
                trace!(conn = %self.id, generation, %reason, "Session already closed");
                false
            }
        }
    }

    fn teardown(self: &Arc<Self>, session: Session, reason: DisconnectReason) {
        // dropping the sender lets the writer drain the queue and shut down
        drop(session.outbound);
        session.reader.abort();

        if let Some(mut cipher) = self.cipher.lock_scoped().take() {
            cipher.dispose();
        }
        self.metrics.connection_closed();

        for hook in self.on_cleanup.snapshot() {
            hook(self);
        }
        info!(conn = %self.id, peer = %self.address(), %reason, "Connection closed");
        for observer in self.on_disconnected.snapshot() {
            observer(self, reason);
        }
    }

    fn decode_frame(&self, payload: &mut Vec<u8>) -> Result<()> {
        match self.cipher.lock_scoped().as_mut() {
            Some(cipher) => {
                let result = cipher.decode(payload);
                self.metrics.decryption(result.is_ok());
                result
            }
            None => Ok(()),
        }
    }

    fn deliver(self: &Arc<Self>, generation: u64, payload: &[u8]) {
        for observer in self.on_frame.snapshot() {
            // an earlier observer may have closed the session
            if !self.is_current(generation) {
                break;
            }
            observer(self, payload);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer", &self.address())
            .field("encrypted", &self.has_cipher())
            .finish()
    }
}

async fn read_loop<R>(
    conn: Arc<Connection>,
    generation: u64,
    mut frames: FramedRead<R, FrameCodec>,
    ready: oneshot::Receiver<()>,
    idle_timeout: Option<Duration>,
) where
    R: AsyncRead + Unpin,
{
    if ready.await.is_err() {
        return;
    }

    let reason = loop {
        let next = match idle_timeout {
            Some(window) => match tokio::time::timeout(window, frames.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(conn = %conn.id, "No frame within idle window");
                    break Some(DisconnectReason::IdleTimeout);
                }
            },
            None => frames.next().await,
        };

        match next {
            Some(Ok(frame)) => {
                conn.metrics
                    .frame_received((frame.len() + FRAME_HEADER_LEN) as u64);
                if !conn.is_current(generation) {
                    break None;
                }
                let mut payload = frame.to_vec();
                if let Err(e) = conn.decode_frame(&mut payload) {
                    warn!(conn = %conn.id, error = %e, "Unable to decode frame");
                    break Some(DisconnectReason::ProtocolViolation);
                }
                conn.deliver(generation, &payload);
                payload.zeroize();
            }
            Some(Err(e)) if e.is_transport() => {
                debug!(conn = %conn.id, error = %e, "Connection lost");
                conn.metrics.connection_error();
                break Some(DisconnectReason::TransportError);
            }
            Some(Err(e)) => {
                warn!(conn = %conn.id, error = %e, "Rejected frame");
                conn.metrics.protocol_error();
                break Some(DisconnectReason::ProtocolViolation);
            }
            None => {
                debug!(conn = %conn.id, "{}", constants::ERR_CONNECTION_CLOSED);
                break Some(DisconnectReason::PeerClosed);
            }
        }
    };

    if let Some(reason) = reason {
        conn.close_session(generation, reason);
    }
}

async fn write_loop<W>(
    conn: Arc<Connection>,
    generation: u64,
    mut sink: FramedWrite<W, FrameCodec>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    send_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        let wire_len = (frame.len() + FRAME_HEADER_LEN) as u64;
        match with_timeout_error(sink.send(frame), send_timeout).await {
            Ok(()) => conn.metrics.frame_sent(wire_len),
            Err(e) if e.is_transport() => {
                debug!(conn = %conn.id, error = %e, "Connection lost while sending");
                conn.metrics.connection_error();
                conn.close_session(generation, DisconnectReason::TransportError);
                break;
            }
            Err(e) => {
                error!(conn = %conn.id, error = %e, "Unable to send frame");
            }
        }
    }

    if let Err(e) = with_timeout_error(sink.close(), send_timeout).await {
        trace!(conn = %conn.id, error = %e, "Writer shutdown incomplete");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::transport::cipher::testing::XorCipher;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn attached() -> (Arc<Connection>, DuplexStream, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let conn = Connection::with_metrics(&NetworkConfig::default(), Arc::clone(&metrics));
        let (local, remote) = duplex(64 * 1024);
        assert!(conn.attach(local, "duplex"));
        (conn, remote, metrics)
    }

    fn reasons(conn: &Arc<Connection>) -> mpsc::UnboundedReceiver<DisconnectReason> {
        let (tx, rx) = mpsc::unbounded_channel();
        conn.on_disconnected(move |_, reason| {
            let _ = tx.send(reason);
        });
        rx
    }

    #[tokio::test]
    async fn test_send_writes_prefixed_frame() {
        let (conn, mut remote, _) = attached();
        conn.send(vec![0xAA, 0xBB]);

        let mut wire = [0u8; 6];
        remote.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [6, 0, 0, 0, 0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order() {
        let (conn, mut remote, _) = attached();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.on_frame(move |_, payload| {
            let _ = tx.send(payload.to_vec());
        });

        // two frames in one write, the second split across writes
        remote
            .write_all(&[5, 0, 0, 0, 1, 6, 0, 0, 0, 2])
            .await
            .unwrap();
        remote.write_all(&[3]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), [1]);
        assert_eq!(rx.recv().await.unwrap(), [2, 3]);
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (conn, remote, metrics) = attached();
        let mut rx = reasons(&conn);
        drop(remote);

        assert_eq!(rx.recv().await.unwrap(), DisconnectReason::PeerClosed);
        assert!(!conn.is_connected());
        assert_eq!(metrics.snapshot().connections_active, 0);
    }

    #[tokio::test]
    async fn test_bad_frame_length_is_violation() {
        let (conn, mut remote, _) = attached();
        let mut rx = reasons(&conn);
        remote.write_all(&[2, 0, 0, 0]).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            DisconnectReason::ProtocolViolation
        );
    }

    #[tokio::test]
    async fn test_double_disconnect_releases_once() {
        let (conn, _remote, _) = attached();
        let disposed = Arc::new(AtomicUsize::new(0));
        conn.set_cipher(Box::new(XorCipher {
            key: 0x5A,
            disposed: Arc::clone(&disposed),
        }));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleanups);
        conn.on_cleanup(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(conn.disconnect());
        assert!(!conn.disconnect());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(!conn.has_cipher());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_noop() {
        let (conn, mut remote, metrics) = attached();
        conn.disconnect();
        conn.send(vec![1, 2, 3]);

        // writer shut its half down without writing anything
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(metrics.snapshot().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_queued_frames_flushed_on_disconnect() {
        let (conn, mut remote, _) = attached();
        conn.send(vec![7]);
        conn.disconnect();

        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, [5, 0, 0, 0, 7]);
    }

    #[tokio::test]
    async fn test_cipher_applies_both_ways() {
        let (conn, mut remote, _) = attached();
        conn.set_cipher(Box::new(XorCipher {
            key: 0xFF,
            disposed: Arc::new(AtomicUsize::new(0)),
        }));
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.on_frame(move |_, payload| {
            let _ = tx.send(payload.to_vec());
        });

        conn.send(vec![0x0F]);
        let mut wire = [0u8; 5];
        remote.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [5, 0, 0, 0, 0xF0]);

        remote.write_all(&[5, 0, 0, 0, 0xF0]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), [0x0F]);
    }

    #[tokio::test]
    async fn test_idle_timeout_disconnects() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.transport.read_idle_timeout = Some(Duration::from_millis(50));
        });
        let conn = Connection::with_metrics(&config, Arc::new(Metrics::new()));
        let mut rx = reasons(&conn);
        let (local, _remote) = duplex(1024);
        conn.attach(local, "idle");

        assert_eq!(rx.recv().await.unwrap(), DisconnectReason::IdleTimeout);
    }

    #[tokio::test]
    async fn test_second_attach_refused() {
        let (conn, _remote, _) = attached();
        let (other, _other_remote) = duplex(1024);
        assert!(!conn.attach(other, "second"));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_connected_fires_before_frames() {
        let conn = Connection::with_metrics(&NetworkConfig::default(), Arc::new(Metrics::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_connect = tx.clone();
        conn.on_connected(move |_| {
            let _ = on_connect.send("connected");
        });
        conn.on_frame(move |_, _| {
            let _ = tx.send("frame");
        });

        let (local, mut remote) = duplex(1024);
        remote.write_all(&[4, 0, 0, 0]).await.unwrap();
        conn.attach(local, "ordered");

        assert_eq!(rx.recv().await.unwrap(), "connected");
        assert_eq!(rx.recv().await.unwrap(), "frame");
    }

    #[tokio::test]
    async fn test_reconnect_survives_stale_writer() {
        let (conn, first_remote, _) = attached();
        let mut rx = reasons(&conn);

        // the first writer still holds this frame when its peer goes away
        conn.send(vec![1, 2, 3]);
        drop(first_remote);
        assert!(conn.disconnect());

        let (local, mut second_remote) = duplex(1024);
        assert!(conn.attach(local, "second"));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(conn.is_connected());
        assert_eq!(rx.recv().await.unwrap(), DisconnectReason::Requested);
        assert!(rx.try_recv().is_err());

        conn.send(vec![9]);
        let mut wire = [0u8; 5];
        second_remote.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [5, 0, 0, 0, 9]);
    }

    #[tokio::test]
    async fn test_reconnect_ignores_stale_reader() {
        let (conn, mut first_remote, _) = attached();
        let mut rx = reasons(&conn);
        assert!(conn.disconnect());

        let (local, _second_remote) = duplex(1024);
        assert!(conn.attach(local, "second"));
        // the old peer may already be gone; only the new session matters
        let _ = first_remote.write_all(&[2, 0, 0, 0]).await;
        drop(first_remote);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(conn.is_connected());
        assert_eq!(rx.recv().await.unwrap(), DisconnectReason::Requested);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frame_not_delivered_after_observer_closes() {
        let (conn, mut remote, _) = attached();
        conn.on_frame(|conn, _| {
            conn.disconnect();
        });
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        conn.on_frame(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut rx = reasons(&conn);

        remote.write_all(&[5, 0, 0, 0, 1]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), DisconnectReason::Requested);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
