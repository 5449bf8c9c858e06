//! WebSocket connection tracking and management.
//!
//! - `WsConnectionManager`: tracks all active push-channel connections
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-connection counters.
#[derive(Default)]
struct ConnectionState {
    /// Frames this subscriber lost to the drop-oldest policy.
    frames_dropped: AtomicU64,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe and designed for concurrent access from multiple WebSocket
/// handlers. A hierarchical cancellation token supports force-closing every
/// connection at shutdown.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Global cancellation token; replaced after each `close_all`.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    /// Creates a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns a guard for RAII cleanup.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections
            .insert(conn_id.clone(), ConnectionState::default());
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    /// Records frames a slow subscriber lost.
    pub fn record_dropped(&self, id: &str, frames: u64) {
        if let Some(state) = self.connections.get(id) {
            state.frames_dropped.fetch_add(frames, Ordering::Relaxed);
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections. Returns how many were signaled.
    ///
    /// After cancellation a fresh token is installed so new connections can
    /// still be accepted.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// Returns the connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token cancelled when the server force-closes connections.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_drop_track_the_count() {
        let manager = Arc::new(WsConnectionManager::new());
        assert_eq!(manager.connection_count(), 0);

        let guard = manager.register();
        assert_eq!(manager.connection_count(), 1);

        drop(guard);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn close_all_cancels_live_guards_and_resets() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();
        assert!(!guard.cancel_token().is_cancelled());

        assert_eq!(manager.close_all(), 1);
        assert!(guard.cancel_token().is_cancelled());

        // New registrations get a fresh, uncancelled token.
        let fresh = manager.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
