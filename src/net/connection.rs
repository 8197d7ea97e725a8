//! Physical connection handles.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry per-connection output settings (response content type)
//! - Count open physical connections
//!
//! # Design Decisions
//! - A handle lives exactly as long as one HTTP request/response pair
//! - Sessions only ever see the [`Transport`] trait, never the socket

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

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

/// What the session layer may do with a physical connection.
pub trait Transport: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Select the content type of the response written on this connection.
    fn set_content_type(&self, content_type: &str);
}

/// Handle for one inbound HTTP request awaiting its response.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    content_type: Mutex<Option<String>>,
}

impl ConnectionHandle {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            content_type: Mutex::new(None),
        }
    }

    /// Handle with no socket behind it.
    pub fn detached() -> Self {
        Self::new(None)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Content type chosen for the response, if any was set.
    pub fn content_type(&self) -> Option<String> {
        self.content_type
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for ConnectionHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn set_content_type(&self, content_type: &str) {
        *self
            .content_type
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(content_type.to_string());
    }
}

/// Tracks open physical connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of open connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let open = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_open_connections(open);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current open connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
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
        let open = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_open_connections(open);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
