//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the WebSocket
//! broadcast channel.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{DjEvent, HistoryEvent, RadioEvent, TrackEvent};

/// Bridges domain events to the WebSocket broadcast channel.
///
/// This adapter implements [`EventEmitter`] by forwarding events to a
/// `tokio::sync::broadcast` channel that WebSocket handlers subscribe to.
/// Sending never blocks; a subscriber that falls behind its bounded buffer
/// observes a `Lagged` error and loses the oldest frames.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<RadioEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<RadioEvent>) -> Self {
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// WebSocket handlers use this to subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<RadioEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(RadioEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_track, TrackEvent, Track);
    impl_emit!(emit_history, HistoryEvent, History);
    impl_emit!(emit_dj, DjEvent, Dj);
}
