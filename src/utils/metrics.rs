//! Observability and Metrics
//!
//! Atomic counters for transport, dispatch and cipher activity. Components
//! record into the process-wide instance unless handed their own.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections refused at the accept limit
    pub connections_refused: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    /// Wire bytes, length prefix included
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Packets routed to a registered handler
    pub packets_dispatched: AtomicU64,
    /// Packets routed to the unknown-opcode fallback
    pub packets_unknown: AtomicU64,
    pub packets_disposed: AtomicU64,
    pub handler_errors: AtomicU64,
    pub encryption_total: AtomicU64,
    pub encryption_failed: AtomicU64,
    pub decryption_total: AtomicU64,
    pub decryption_failed: AtomicU64,
    pub connection_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_dispatched: AtomicU64::new(0),
            packets_unknown: AtomicU64::new(0),
            packets_disposed: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            encryption_total: AtomicU64::new(0),
            encryption_failed: AtomicU64::new(0),
            decryption_total: AtomicU64::new(0),
            decryption_failed: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // saturate instead of wrapping if a close is ever recorded twice
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame written to the wire
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame read off the wire
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_dispatched(&self) {
        self.packets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_unknown(&self) {
        self.packets_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_disposed(&self) {
        self.packets_disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encryption(&self, ok: bool) {
        self.encryption_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.encryption_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn decryption(&self, ok: bool) {
        self.decryption_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.decryption_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            packets_unknown: self.packets_unknown.load(Ordering::Relaxed),
            packets_disposed: self.packets_disposed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            encryption_total: self.encryption_total.load(Ordering::Relaxed),
            encryption_failed: self.encryption_failed.load(Ordering::Relaxed),
            decryption_total: self.decryption_total.load(Ordering::Relaxed),
            decryption_failed: self.decryption_failed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_refused = snapshot.connections_refused,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            packets_dispatched = snapshot.packets_dispatched,
            packets_unknown = snapshot.packets_unknown,
            packets_disposed = snapshot.packets_disposed,
            handler_errors = snapshot.handler_errors,
            encryption_total = snapshot.encryption_total,
            encryption_failed = snapshot.encryption_failed,
            decryption_total = snapshot.decryption_total,
            decryption_failed = snapshot.decryption_failed,
            connection_errors = snapshot.connection_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_dispatched: u64,
    pub packets_unknown: u64,
    pub packets_disposed: u64,
    pub handler_errors: u64,
    pub encryption_total: u64,
    pub encryption_failed: u64,
    pub decryption_total: u64,
    pub decryption_failed: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

/// Process-wide metrics instance
pub fn global_metrics() -> Arc<Metrics> {
    Arc::clone(&METRICS)
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
