//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use super::{DjEvent, HistoryEvent, TrackEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients.
pub trait EventEmitter: Send + Sync {
    /// Emits a track-change event.
    fn emit_track(&self, event: TrackEvent);

    /// Emits a history-appended event.
    fn emit_history(&self, event: HistoryEvent);

    /// Emits a DJ job state event.
    fn emit_dj(&self, event: DjEvent);
}

/// No-op emitter for testing.
///
/// Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_track(&self, _event: TrackEvent) {
        // No-op
    }

    fn emit_history(&self, _event: HistoryEvent) {
        // No-op
    }

    fn emit_dj(&self, _event: DjEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_track(&self, event: TrackEvent) {
        log::debug!("[Events] track_event: {:?}", event);
    }

    fn emit_history(&self, event: HistoryEvent) {
        log::debug!("[Events] history_event: {:?}", event);
    }

    fn emit_dj(&self, event: DjEvent) {
        log::debug!("[Events] dj_event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        track_count: AtomicUsize,
        dj_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                track_count: AtomicUsize::new(0),
                dj_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_track(&self, _event: TrackEvent) {
            self.track_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_history(&self, _event: HistoryEvent) {}

        fn emit_dj(&self, _event: DjEvent) {
            self.dj_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_track(TrackEvent::Changed {
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            album: String::new(),
            artwork_ref: None,
            started_at_ms: 0,
            timestamp: 0,
        });
        emitter.emit_dj(DjEvent::StateChanged {
            job_id: "job".to_string(),
            state: "armed".to_string(),
            track_title: "Song".to_string(),
            track_artist: "Artist".to_string(),
            timestamp: 0,
        });

        assert_eq!(emitter.track_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.dj_count.load(Ordering::SeqCst), 1);
    }
}
