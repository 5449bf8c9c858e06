//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for the track, history, and DJ domains
//!
//! The actual transport implementation (WebSocket) is handled separately in
//! the `api` module using [`BroadcastEventBridge`].
//!
//! Delivery is best-effort: subscribers receive events through bounded
//! buffers, a slow subscriber loses the oldest frames, and publishers never
//! block. The store remains the ordered source of truth and can be queried
//! to recover anything dropped here.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to clients.
///
/// This enum categorizes all real-time events that can be sent to connected
/// clients. Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum RadioEvent {
    /// The on-air track changed.
    Track(TrackEvent),

    /// The play history grew.
    History(HistoryEvent),

    /// A DJ job moved through its state machine.
    Dj(DjEvent),
}

/// Events describing the on-air track.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackEvent {
    /// A different track is now playing.
    Changed {
        /// Track title.
        title: String,
        /// Track artist.
        artist: String,
        /// Album, when the engine reports one.
        album: String,
        /// Artwork cache key, when cover art is available.
        #[serde(rename = "artworkRef", skip_serializing_if = "Option::is_none")]
        artwork_ref: Option<String>,
        /// When the track started playing (Unix milliseconds).
        #[serde(rename = "startedAtMs")]
        started_at_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events describing the persisted play history.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryEvent {
    /// A play event was committed to the store.
    ///
    /// Broadcast strictly after the commit succeeds, so subscribers never
    /// observe an id that cannot be read back.
    Appended {
        /// Committed play event id.
        id: i64,
        /// Event kind (`song` or `dj`).
        kind: String,
        /// Track title.
        title: String,
        /// Track artist.
        artist: String,
        /// Event time (Unix milliseconds).
        #[serde(rename = "epochMs")]
        epoch_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the DJ pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DjEvent {
    /// A job transitioned to a new state.
    StateChanged {
        /// Stable job identifier.
        #[serde(rename = "jobId")]
        job_id: String,
        /// New state name (`armed`, `generating`, ... `cancelled`).
        state: String,
        /// Title of the track the line is for.
        #[serde(rename = "trackTitle")]
        track_title: String,
        /// Artist of the track the line is for.
        #[serde(rename = "trackArtist")]
        track_artist: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to RadioEvent
impl From<TrackEvent> for RadioEvent {
    fn from(event: TrackEvent) -> Self {
        RadioEvent::Track(event)
    }
}

impl From<HistoryEvent> for RadioEvent {
    fn from(event: HistoryEvent) -> Self {
        RadioEvent::History(event)
    }
}

impl From<DjEvent> for RadioEvent {
    fn from(event: DjEvent) -> Self {
        RadioEvent::Dj(event)
    }
}
