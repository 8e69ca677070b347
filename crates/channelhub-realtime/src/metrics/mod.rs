//! Hub metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Hub-level metrics counters.
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Total connections admitted
    pub connections_opened: AtomicU64,
    /// Connections currently registered
    pub connections_active: AtomicU64,
    /// Sessions currently registered
    pub sessions_active: AtomicU64,
    /// Frames decoded from clients
    pub messages_received: AtomicU64,
    /// Frames written to clients
    pub messages_sent: AtomicU64,
    /// Channels created at runtime
    pub channels_created: AtomicU64,
    /// Channels removed after their last unsubscribe
    pub channels_removed: AtomicU64,
    /// Malformed, unroutable or denied messages
    pub messages_dropped: AtomicU64,
}

impl HubMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_channels_created(&self) {
        self.channels_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_channels_removed(&self) {
        self.channels_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Sets the gauges owned by the hub loop.
    pub fn set_active(&self, connections: u64, sessions: u64) {
        self.connections_active.store(connections, Ordering::Relaxed);
        self.sessions_active.store(sessions, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            channels_created: self.channels_created.load(Ordering::Relaxed),
            channels_removed: self.channels_removed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_active: u64,
    pub sessions_active: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub channels_created: u64,
    pub channels_removed: u64,
    pub messages_dropped: u64,
}
