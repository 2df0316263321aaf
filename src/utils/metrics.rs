//! Observability and Metrics
//!
//! Per-server counters for connections, messages and failures.
//!
//! Uses atomic counters so a snapshot can be read from another task while
//! the server loop keeps running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::engine::CloseReason;

/// Metrics collector owned by one `Server`
#[derive(Debug)]
pub struct Metrics {
    /// Total connections opened
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total messages delivered to the message callback
    pub messages_received: AtomicU64,
    /// Total frames queued to peers
    pub messages_sent: AtomicU64,
    /// Total payload bytes received
    pub bytes_received: AtomicU64,
    /// Total payload bytes queued to peers
    pub bytes_sent: AtomicU64,
    /// Sends refused or rejected by the engine
    pub send_failures: AtomicU64,
    /// Connections dropped by the keep-alive policy
    pub keep_alive_timeouts: AtomicU64,
    /// Connections dropped for protocol violations
    pub protocol_violations: AtomicU64,
    /// Connections dropped for transport I/O errors
    pub io_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            keep_alive_timeouts: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed, classified by reason
    pub fn connection_closed(&self, reason: &CloseReason) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        match reason {
            CloseReason::KeepAliveTimeout => {
                self.keep_alive_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::ProtocolViolation(_) => {
                self.protocol_violations.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::Io(_) => {
                self.io_errors.fetch_add(1, Ordering::Relaxed);
            }
            CloseReason::Peer | CloseReason::Local | CloseReason::Shutdown => {}
        }
    }

    /// Record a message received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a failed send
    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            keep_alive_timeouts: self.keep_alive_timeouts.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            messages_received = snapshot.messages_received,
            messages_sent = snapshot.messages_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            send_failures = snapshot.send_failures,
            keep_alive_timeouts = snapshot.keep_alive_timeouts,
            protocol_violations = snapshot.protocol_violations,
            io_errors = snapshot.io_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
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
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub keep_alive_timeouts: u64,
    pub protocol_violations: u64,
    pub io_errors: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring callback duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
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
            "Callback completed"
        );
    }
}
