use serde::Serialize;
/// Broker metrics
///
/// Lock-free counters per connection and for the broker as a whole.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// CONNECTION METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Inbound text frames
    messages_received: AtomicU64,

    /// Items accepted by the outbound queue
    messages_sent: AtomicU64,

    /// Items rejected by the outbound queue (full or closed)
    messages_dropped: AtomicU64,

    queue_size: AtomicUsize,

    peak_queue_size: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self, count: u64) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size, Ordering::Relaxed);
        self.peak_queue_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            peak_queue_size: self.peak_queue_size.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub queue_size: usize,
    pub peak_queue_size: usize,
}

// ============================================================================
// BROKER METRICS
// ============================================================================

/// Aggregate across all connections
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Lifetime connection count
    total_connections: AtomicU64,

    active_connections: AtomicUsize,

    total_messages_received: AtomicU64,

    total_messages_sent: AtomicU64,

    total_messages_dropped: AtomicU64,

    /// Errors reported through the error handler
    total_errors: AtomicU64,

    /// Connections closed by the heartbeat sweep
    heartbeat_timeouts: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn message_received(&self) {
        self.total_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self, count: u64) {
        self.total_messages_dropped
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn error_reported(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages_received: self.total_messages_received.load(Ordering::Relaxed),
            total_messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            total_messages_dropped: self.total_messages_dropped.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HubMetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_messages_received: u64,
    pub total_messages_sent: u64,
    pub total_messages_dropped: u64,
    pub total_errors: u64,
    pub heartbeat_timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_metrics() {
        let metrics = ConnectionMetrics::new();

        metrics.inc_sent();
        metrics.inc_sent();
        metrics.inc_dropped(5);
        metrics.set_queue_size(10);
        metrics.set_queue_size(20);
        metrics.set_queue_size(15);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.messages_dropped, 5);
        assert_eq!(snapshot.queue_size, 15);
        assert_eq!(snapshot.peak_queue_size, 20);
    }

    #[test]
    fn test_hub_metrics() {
        let metrics = HubMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.message_sent();
        metrics.message_dropped(3);
        metrics.connection_closed();
        metrics.connection_closed();
        // never underflows
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_messages_sent, 1);
        assert_eq!(snapshot.total_messages_dropped, 3);
    }
}
