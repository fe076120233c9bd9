//! Connection identity, lifecycle state and open-connection tracking.
//!
//! # Responsibilities
//! - Track connection state (Handshaking → Established → Closing → Closed)
//! - Generate unique connection IDs for tracing
//! - Count open connections so shutdown can wait for them to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Security lifecycle of a connection.
///
/// States only move forward; see [`ConnectionState::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Key negotiation in progress; no application bytes are released.
    Handshaking,
    /// Plaintext flows in both directions.
    Established,
    /// Graceful shutdown started; in-flight bytes are drained.
    Closing,
    /// The channel is closed.
    Closed,
}

impl ConnectionState {
    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `false` (and leaves the state untouched) for backward or
    /// repeated transitions.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Tracks open connections for graceful shutdown.
///
/// The count lives inside a watch channel: every update is serialized by the
/// channel and waiters are woken without polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    count_tx: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count_tx: Arc::new(tx),
        }
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let mut active = 0;
        self.count_tx.send_modify(|count| {
            *count += 1;
            active = *count;
        });
        metrics::record_connection_opened(active);
        ConnectionGuard {
            count_tx: Arc::clone(&self.count_tx),
            id: ConnectionId::new(),
        }
    }

    /// Get current open connection count.
    pub fn active_count(&self) -> u64 {
        *self.count_tx.borrow()
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.count_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    count_tx: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut active = 0;
        self.count_tx.send_modify(|count| {
            *count = count.saturating_sub(1);
            active = *count;
        });
        metrics::record_connection_closed(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
