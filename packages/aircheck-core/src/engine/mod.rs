//! Audio engine adapter.
//!
//! The engine mixes music and injected audio in a separate process; this
//! module owns every interaction with it. All other components MUST go
//! through [`EngineControl`] — nobody else opens a connection to the control
//! port, which is what keeps the connection count at exactly one.

mod adapter;
pub mod protocol;

pub use adapter::EngineAdapter;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from engine interaction.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be reached (transport failure, reconnecting).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine explicitly refused the request.
    #[error("engine rejected request: {0}")]
    Rejected(String),

    /// The command did not complete within its timeout.
    #[error("engine command timed out")]
    Timeout,

    /// The engine answered with something the protocol layer cannot parse.
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

/// Convenient Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Raw on-air track fields as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when the engine does not report one.
    pub album: String,
    /// Source URI of the media, when known.
    pub source_uri: Option<String>,
    /// Track duration in milliseconds, when the engine reports one.
    pub duration_ms: Option<u64>,
}

impl NowPlaying {
    /// Builds track fields from a `request.metadata` key/value block.
    #[must_use]
    pub fn from_metadata(kv: &HashMap<String, String>) -> Self {
        let get = |key: &str| kv.get(key).cloned().unwrap_or_default();
        Self {
            title: get("title"),
            artist: get("artist"),
            album: get("album"),
            source_uri: kv
                .get("initial_uri")
                .or_else(|| kv.get("filename"))
                .cloned(),
            duration_ms: kv
                .get("duration")
                .and_then(|d| d.parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64),
        }
    }
}

/// One queued upcoming item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when unknown.
    pub album: String,
    /// Source URI of the media, when known.
    pub source_uri: Option<String>,
}

impl From<NowPlaying> for TrackRef {
    fn from(now: NowPlaying) -> Self {
        Self {
            title: now.title,
            artist: now.artist,
            album: now.album,
            source_uri: now.source_uri,
        }
    }
}

/// A synthesized audio file submitted for priority playback.
#[derive(Debug, Clone)]
pub struct TtsEnqueue {
    /// Path of the audio file on the shared filesystem.
    pub audio_path: PathBuf,
    /// Title of the track the line introduces (round-trips via annotate).
    pub title: String,
    /// Artist of the track the line introduces.
    pub artist: String,
    /// Artifact id, so the engine's play webhook can link back to the store.
    pub tts_id: Option<i64>,
}

/// Engine reachability as seen by the adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    /// Whether the control connection is currently established.
    pub connected: bool,
    /// Unix milliseconds of the last successful command, if any.
    pub last_ok_ms: Option<u64>,
}

/// Control-plane operations on the audio engine.
///
/// The implementation serializes every request behind a single long-lived
/// connection; one request is in flight at a time and the connection is
/// reused while idle.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// Returns the currently playing track, or `None` when nothing is on air.
    async fn now(&self) -> EngineResult<Option<NowPlaying>>;

    /// Returns up to `n` queued items in play order, excluding the currently
    /// playing item.
    async fn upcoming(&self, n: usize) -> EngineResult<Vec<TrackRef>>;

    /// Submits a synthesized audio file for priority playback.
    async fn enqueue_tts(&self, item: &TtsEnqueue) -> EngineResult<()>;

    /// Requests the engine to advance past the current item.
    async fn skip(&self) -> EngineResult<()>;

    /// Returns current reachability without touching the wire.
    fn health(&self) -> EngineHealth;
}
