//! Durable storage for play events, TTS artifacts, and the artwork cache.
//!
//! One SQLite database holds the three tables. Writes go through a single
//! writer connection (single-writer discipline); reads use a dedicated reader
//! connection against WAL snapshots so history queries never block the commit
//! path. Every call crosses into `spawn_blocking`, keeping the async runtime
//! free of filesystem stalls.
//!
//! All multi-row operations run inside one transaction. The store owns every
//! persisted entity; other components treat what they read as immutable
//! snapshots.

mod schema;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::utils::now_millis;

/// Two events with the same `(kind, title, artist)` inside this window are
/// one event reported twice.
pub const DEDUP_WINDOW_MS: u64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Entity types
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a play event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A music track.
    Song,
    /// A spoken DJ segment.
    Dj,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Dj => "dj",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "song" => Some(Self::Song),
            "dj" => Some(Self::Dj),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a TTS artifact was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsMode {
    /// Spoken intro for an upcoming track.
    Intro,
    /// Spoken outro for a finished track.
    Outro,
    /// Externally produced or one-off segment.
    Custom,
}

impl TtsMode {
    /// Stable lowercase name, used in SQL and artifact filenames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Outro => "outro",
            Self::Custom => "custom",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "intro" => Some(Self::Intro),
            "outro" => Some(Self::Outro),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Lifecycle state of a TTS artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsStatus {
    /// Registered, audio not yet validated.
    Pending,
    /// Audio validated and playable.
    Ready,
    /// Production or validation failed.
    Failed,
    /// Superseded or abandoned; awaiting GC.
    Garbage,
}

impl TtsStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Garbage => "garbage",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            "garbage" => Some(Self::Garbage),
            _ => None,
        }
    }

    /// The only legal transitions are `pending → ready | failed` and
    /// `ready → garbage`.
    fn can_transition_to(self, to: TtsStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Ready)
                | (Self::Pending, Self::Failed)
                | (Self::Ready, Self::Garbage)
        )
    }
}

impl fmt::Display for TtsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A play event about to be committed.
#[derive(Debug, Clone)]
pub struct NewPlayEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Event time (Unix milliseconds).
    pub epoch_ms: u64,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when unknown.
    pub album: String,
    /// Source URI of the media.
    pub source_uri: Option<String>,
    /// Artwork cache key.
    pub artwork_ref: Option<String>,
    /// Opaque key/value bag round-tripped from the event source.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A committed, immutable play event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    /// Monotonic id; reflects commit order.
    pub id: i64,
    /// Event kind.
    pub kind: EventKind,
    /// Event time (Unix milliseconds).
    pub epoch_ms: u64,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when unknown.
    pub album: String,
    /// Source URI of the media.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    /// Artwork cache key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
    /// Linked TTS artifact (set only for `dj` events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_id: Option<i64>,
    /// Opaque key/value bag.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A TTS artifact about to be registered.
#[derive(Debug, Clone)]
pub struct NewTtsArtifact {
    /// Unique creation timestamp (also used in artifact filenames).
    pub epoch_ms: u64,
    /// The spoken text.
    pub text: String,
    /// Path of the audio file.
    pub audio_path: String,
    /// Path of the transcript sidecar.
    pub transcript_path: Option<String>,
    /// Title of the track the line is for.
    pub track_title: String,
    /// Artist of the track the line is for.
    pub track_artist: String,
    /// What the line was produced for.
    pub mode: TtsMode,
}

/// A registered TTS artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsArtifact {
    /// Surrogate id.
    pub id: i64,
    /// Unique creation timestamp.
    pub epoch_ms: u64,
    /// The spoken text.
    pub text: String,
    /// Path of the audio file.
    pub audio_path: String,
    /// Path of the transcript sidecar.
    pub transcript_path: Option<String>,
    /// Title of the track the line is for.
    pub track_title: String,
    /// Artist of the track the line is for.
    pub track_artist: String,
    /// What the line was produced for.
    pub mode: TtsMode,
    /// Lifecycle state.
    pub status: TtsStatus,
    /// Size of the audio file in bytes.
    pub size_bytes: u64,
    /// Audio duration, when known.
    pub duration_ms: Option<u64>,
    /// Registration time (Unix milliseconds).
    pub created_ms: u64,
}

/// One artwork cache row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkEntry {
    /// Content fingerprint of artist|album or of the file path.
    pub key: String,
    /// Artist the art belongs to.
    pub artist: String,
    /// Album the art belongs to.
    pub album: String,
    /// Where the art came from.
    pub source_uri: Option<String>,
    /// Cached image file on disk.
    pub local_path: String,
    /// Size of the cached image.
    pub size_bytes: u64,
    /// When the entry was created (Unix milliseconds).
    pub cached_at: u64,
    /// Last read access (Unix milliseconds); drives LRU eviction.
    pub last_used_at: u64,
}

/// A history row: the event plus the linked DJ text when it is playable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// The committed event.
    #[serde(flatten)]
    pub event: PlayEvent,
    /// Text of the linked `ready` TTS artifact, for `dj` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The dedup window already holds an event with the same key.
    #[error("duplicate event (existing id {existing_id})")]
    DuplicateEvent {
        /// Id of the already-committed event.
        existing_id: i64,
    },

    /// The referenced TTS artifact is not in the `ready` state.
    #[error("tts artifact {0} is not ready")]
    NotReady(i64),

    /// The requested status change is not a legal transition.
    #[error("illegal tts transition {from} -> {to}")]
    IllegalTransition {
        /// Current status.
        from: TtsStatus,
        /// Requested status.
        to: TtsStatus,
    },

    /// Entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table-level entity name.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },

    /// The backend failed; callers retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the SQLite-backed store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    write_conn: Arc<Mutex<Connection>>,
    read_conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (and if needed creates) the database, applying the schema.
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let db_path = config.db_path.clone();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("create data dir: {}", e)))?;
        }
        tokio::fs::create_dir_all(&config.tts_dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("create tts dir: {}", e)))?;
        tokio::fs::create_dir_all(&config.artwork_dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("create artwork dir: {}", e)))?;

        tokio::task::spawn_blocking(move || Self::open_blocking(&db_path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store open task: {}", e)))?
    }

    fn open_blocking(db_path: &Path) -> StoreResult<Self> {
        let write_conn = Connection::open(db_path)?;
        schema::configure_connection(&write_conn)?;
        schema::initialize(&write_conn)?;

        let read_conn = Connection::open(db_path)?;
        schema::configure_connection(&read_conn)?;

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_conn: Arc::new(Mutex::new(read_conn)),
        })
    }

    async fn with_write<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.write_conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("write task: {}", e)))?
    }

    async fn with_read<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.read_conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("read task: {}", e)))?
    }

    /// Liveness probe for health checks.
    pub async fn ping(&self) -> StoreResult<()> {
        self.with_read(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    // ── Play events ─────────────────────────────────────────────────────────

    /// Commits a play event; rejects duplicates inside the dedup window.
    pub async fn commit_play_event(&self, event: NewPlayEvent) -> StoreResult<i64> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = insert_event(&tx, &event, None)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    /// Commits a play event and links it to a `ready` TTS artifact, atomically.
    pub async fn commit_and_link(&self, event: NewPlayEvent, tts_id: i64) -> StoreResult<i64> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_status(&tx, tts_id, TtsStatus::Ready)?;
            let id = insert_event(&tx, &event, Some(tts_id))?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    /// Finds the event a duplicate commit collided with, for idempotent
    /// producer retries.
    pub async fn lookup_by_dedup(
        &self,
        kind: EventKind,
        title: String,
        artist: String,
        epoch_ms: u64,
    ) -> StoreResult<Option<PlayEvent>> {
        self.with_read(move |conn| {
            let found = conn
                .query_row(
                    &format!("SELECT {} FROM play_events WHERE kind = ?1 AND title = ?2 AND artist = ?3 AND epoch_ms BETWEEN ?4 AND ?5 ORDER BY id DESC LIMIT 1", EVENT_COLUMNS),
                    params![
                        kind.as_str(),
                        title,
                        artist,
                        epoch_ms.saturating_sub(DEDUP_WINDOW_MS) as i64,
                        (epoch_ms + DEDUP_WINDOW_MS) as i64,
                    ],
                    row_to_event,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    /// Links an existing event to a `ready` TTS artifact.
    pub async fn link_tts(&self, event_id: i64, tts_id: i64) -> StoreResult<()> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            require_status(&tx, tts_id, TtsStatus::Ready)?;
            let changed = tx.execute(
                "UPDATE play_events SET tts_entry_id = ?1 WHERE id = ?2",
                params![tts_id, event_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "play_event",
                    id: event_id,
                });
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Reads history, newest first. `before` pages by id.
    pub async fn history(
        &self,
        limit: usize,
        before: Option<i64>,
    ) -> StoreResult<Vec<HistoryEntry>> {
        self.with_read(move |conn| {
            let sql = format!(
                "SELECT {}, t.text, t.status \
                 FROM play_events e LEFT JOIN tts_artifacts t ON e.tts_entry_id = t.id \
                 WHERE (?1 IS NULL OR e.id < ?1) \
                   AND NOT (e.kind = 'dj' AND e.tts_entry_id IS NOT NULL AND t.status != 'ready') \
                 ORDER BY e.id DESC LIMIT ?2",
                EVENT_COLUMNS_QUALIFIED
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![before, limit as i64], |row| {
                let event = row_to_event(row)?;
                let text: Option<String> = row.get(10)?;
                let status: Option<String> = row.get(11)?;
                Ok((event, text, status))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (event, text, status) = row?;
                let tts_text = match (event.kind, status.as_deref()) {
                    (EventKind::Dj, Some("ready")) => text,
                    _ => None,
                };
                out.push(HistoryEntry { event, tts_text });
            }
            Ok(out)
        })
        .await
    }

    /// True when a `dj` event was committed within the last `window_ms`.
    pub async fn dj_event_within(&self, window_ms: u64) -> StoreResult<bool> {
        let cutoff = now_millis().saturating_sub(window_ms);
        self.with_read(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM play_events WHERE kind = 'dj' AND epoch_ms >= ?1 LIMIT 1",
                    params![cutoff as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// Deletes the oldest events beyond the retention count. Returns the
    /// number of rows removed.
    pub async fn prune_history(&self, keep: u32) -> StoreResult<usize> {
        self.with_write(move |conn| {
            let removed = conn.execute(
                "DELETE FROM play_events WHERE id NOT IN \
                 (SELECT id FROM play_events ORDER BY id DESC LIMIT ?1)",
                params![keep as i64],
            )?;
            Ok(removed)
        })
        .await
    }

    // ── TTS artifacts ───────────────────────────────────────────────────────

    /// Registers a new artifact in the `pending` state.
    pub async fn register_tts(&self, artifact: NewTtsArtifact) -> StoreResult<i64> {
        self.with_write(move |conn| {
            conn.execute(
                "INSERT INTO tts_artifacts \
                 (epoch_ms, text, audio_path, transcript_path, track_title, track_artist, mode, status, created_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
                params![
                    artifact.epoch_ms as i64,
                    artifact.text,
                    artifact.audio_path,
                    artifact.transcript_path,
                    artifact.track_title,
                    artifact.track_artist,
                    artifact.mode.as_str(),
                    now_millis() as i64,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Moves an artifact to a new status, recording size and duration.
    ///
    /// Only `pending → ready|failed` and `ready → garbage` are legal; any
    /// other request fails with [`StoreError::IllegalTransition`].
    pub async fn mark_tts(
        &self,
        id: i64,
        status: TtsStatus,
        size_bytes: u64,
        duration_ms: Option<u64>,
    ) -> StoreResult<()> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = artifact_status(&tx, id)?;
            if !current.can_transition_to(status) {
                return Err(StoreError::IllegalTransition {
                    from: current,
                    to: status,
                });
            }
            tx.execute(
                "UPDATE tts_artifacts SET status = ?1, size_bytes = ?2, duration_ms = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    size_bytes as i64,
                    duration_ms.map(|d| d as i64),
                    id
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Reads a single artifact.
    pub async fn tts_artifact(&self, id: i64) -> StoreResult<Option<TtsArtifact>> {
        self.with_read(move |conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM tts_artifacts WHERE id = ?1",
                        ARTIFACT_COLUMNS
                    ),
                    params![id],
                    row_to_artifact,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    /// Registers an externally produced TTS and its `dj` play event in one
    /// transaction. The artifact is born `ready` (the audio already exists
    /// elsewhere). Returns `(event_id, tts_id)`.
    pub async fn commit_external_tts(
        &self,
        artifact: NewTtsArtifact,
        event: NewPlayEvent,
    ) -> StoreResult<(i64, i64)> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO tts_artifacts \
                 (epoch_ms, text, audio_path, transcript_path, track_title, track_artist, mode, status, created_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ready', ?8)",
                params![
                    artifact.epoch_ms as i64,
                    artifact.text,
                    artifact.audio_path,
                    artifact.transcript_path,
                    artifact.track_title,
                    artifact.track_artist,
                    artifact.mode.as_str(),
                    now_millis() as i64,
                ],
            )?;
            let tts_id = tx.last_insert_rowid();
            let event_id = insert_event(&tx, &event, Some(tts_id))?;
            tx.commit()?;
            Ok((event_id, tts_id))
        })
        .await
    }

    /// Startup sweeper: a `pending` artifact after a restart means the
    /// process died between registration and validation. Flip them to
    /// `failed` so they can never be linked.
    pub async fn sweep_pending(&self) -> StoreResult<usize> {
        self.with_write(|conn| {
            let swept = conn.execute(
                "UPDATE tts_artifacts SET status = 'failed' WHERE status = 'pending'",
                [],
            )?;
            Ok(swept)
        })
        .await
    }

    /// Deletes `failed`/`garbage` artifacts older than the cutoff, returning
    /// the file paths whose bytes the caller should remove.
    pub async fn collect_garbage(&self, older_than_ms: u64) -> StoreResult<Vec<String>> {
        let cutoff = now_millis().saturating_sub(older_than_ms);
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut paths = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT audio_path, transcript_path FROM tts_artifacts \
                     WHERE status IN ('failed', 'garbage') AND created_ms <= ?1",
                )?;
                let rows = stmt.query_map(params![cutoff as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })?;
                for row in rows {
                    let (audio, transcript) = row?;
                    paths.push(audio);
                    if let Some(t) = transcript {
                        paths.push(t);
                    }
                }
            }
            tx.execute(
                "DELETE FROM tts_artifacts \
                 WHERE status IN ('failed', 'garbage') AND created_ms <= ?1",
                params![cutoff as i64],
            )?;
            tx.commit()?;
            Ok(paths)
        })
        .await
    }

    // ── Artwork cache ───────────────────────────────────────────────────────

    /// Inserts or replaces an artwork cache entry.
    pub async fn put_artwork(&self, entry: ArtworkEntry) -> StoreResult<()> {
        self.with_write(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO artwork_cache \
                 (cache_key, artist, album, source_uri, local_path, size_bytes, cached_at, last_used_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.key,
                    entry.artist,
                    entry.album,
                    entry.source_uri,
                    entry.local_path,
                    entry.size_bytes as i64,
                    entry.cached_at as i64,
                    entry.last_used_at as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Looks up an artwork entry by cache key.
    pub async fn get_artwork(&self, key: String) -> StoreResult<Option<ArtworkEntry>> {
        self.with_read(move |conn| {
            let found = conn
                .query_row(
                    "SELECT cache_key, artist, album, source_uri, local_path, size_bytes, cached_at, last_used_at \
                     FROM artwork_cache WHERE cache_key = ?1",
                    params![key],
                    row_to_artwork,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    /// Bumps an entry's `last_used_at` so eviction keeps hot art around.
    pub async fn touch_artwork(&self, key: String) -> StoreResult<()> {
        self.with_write(move |conn| {
            conn.execute(
                "UPDATE artwork_cache SET last_used_at = ?1 WHERE cache_key = ?2",
                params![now_millis() as i64, key],
            )?;
            Ok(())
        })
        .await
    }

    /// Evicts least-recently-used entries until total size fits the cap.
    /// Returns the file paths of evicted images for the caller to unlink.
    pub async fn evict_artwork_over(&self, cap_bytes: u64) -> StoreResult<Vec<String>> {
        self.with_write(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut total: i64 =
                tx.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM artwork_cache", [], |row| {
                    row.get(0)
                })?;

            let mut evicted = Vec::new();
            while total > cap_bytes as i64 {
                let lru: Option<(String, String, i64)> = tx
                    .query_row(
                        "SELECT cache_key, local_path, size_bytes FROM artwork_cache \
                         ORDER BY last_used_at ASC LIMIT 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                let Some((key, path, size)) = lru else {
                    break;
                };
                tx.execute("DELETE FROM artwork_cache WHERE cache_key = ?1", params![key])?;
                total -= size;
                evicted.push(path);
            }
            tx.commit()?;
            Ok(evicted)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping and transaction helpers
// ─────────────────────────────────────────────────────────────────────────────

const EVENT_COLUMNS: &str =
    "id, kind, epoch_ms, title, artist, album, source_uri, artwork_key, tts_entry_id, extra";

const EVENT_COLUMNS_QUALIFIED: &str =
    "e.id, e.kind, e.epoch_ms, e.title, e.artist, e.album, e.source_uri, e.artwork_key, e.tts_entry_id, e.extra";

const ARTIFACT_COLUMNS: &str =
    "id, epoch_ms, text, audio_path, transcript_path, track_title, track_artist, mode, status, size_bytes, duration_ms, created_ms";

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayEvent> {
    let kind_raw: String = row.get(1)?;
    let extra_raw: String = row.get(9)?;
    Ok(PlayEvent {
        id: row.get(0)?,
        kind: EventKind::parse(&kind_raw).unwrap_or(EventKind::Song),
        epoch_ms: row.get::<_, i64>(2)? as u64,
        title: row.get(3)?,
        artist: row.get(4)?,
        album: row.get(5)?,
        source_uri: row.get(6)?,
        artwork_ref: row.get(7)?,
        tts_id: row.get(8)?,
        extra: serde_json::from_str(&extra_raw).unwrap_or_default(),
    })
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<TtsArtifact> {
    let mode_raw: String = row.get(7)?;
    let status_raw: String = row.get(8)?;
    Ok(TtsArtifact {
        id: row.get(0)?,
        epoch_ms: row.get::<_, i64>(1)? as u64,
        text: row.get(2)?,
        audio_path: row.get(3)?,
        transcript_path: row.get(4)?,
        track_title: row.get(5)?,
        track_artist: row.get(6)?,
        mode: TtsMode::parse(&mode_raw).unwrap_or(TtsMode::Custom),
        status: TtsStatus::parse(&status_raw).unwrap_or(TtsStatus::Failed),
        size_bytes: row.get::<_, i64>(9)? as u64,
        duration_ms: row.get::<_, Option<i64>>(10)?.map(|d| d as u64),
        created_ms: row.get::<_, i64>(11)? as u64,
    })
}

fn row_to_artwork(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtworkEntry> {
    Ok(ArtworkEntry {
        key: row.get(0)?,
        artist: row.get(1)?,
        album: row.get(2)?,
        source_uri: row.get(3)?,
        local_path: row.get(4)?,
        size_bytes: row.get::<_, i64>(5)? as u64,
        cached_at: row.get::<_, i64>(6)? as u64,
        last_used_at: row.get::<_, i64>(7)? as u64,
    })
}

/// Inserts a play event after the dedup-window check. Runs inside the
/// caller's transaction.
fn insert_event(
    tx: &rusqlite::Transaction<'_>,
    event: &NewPlayEvent,
    tts_id: Option<i64>,
) -> StoreResult<i64> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM play_events \
             WHERE kind = ?1 AND title = ?2 AND artist = ?3 AND epoch_ms BETWEEN ?4 AND ?5 \
             ORDER BY id DESC LIMIT 1",
            params![
                event.kind.as_str(),
                event.title,
                event.artist,
                event.epoch_ms.saturating_sub(DEDUP_WINDOW_MS) as i64,
                (event.epoch_ms + DEDUP_WINDOW_MS) as i64,
            ],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        return Err(StoreError::DuplicateEvent { existing_id });
    }

    let extra = serde_json::Value::Object(event.extra.clone()).to_string();
    tx.execute(
        "INSERT INTO play_events \
         (kind, epoch_ms, title, artist, album, source_uri, artwork_key, tts_entry_id, extra) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.kind.as_str(),
            event.epoch_ms as i64,
            event.title,
            event.artist,
            event.album,
            event.source_uri,
            event.artwork_ref,
            tts_id,
            extra,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Fails unless the artifact exists and has the required status.
fn require_status(
    tx: &rusqlite::Transaction<'_>,
    tts_id: i64,
    required: TtsStatus,
) -> StoreResult<()> {
    let current = artifact_status(tx, tts_id)?;
    if current != required {
        return Err(StoreError::NotReady(tts_id));
    }
    Ok(())
}

fn artifact_status(tx: &rusqlite::Transaction<'_>, tts_id: i64) -> StoreResult<TtsStatus> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT status FROM tts_artifacts WHERE id = ?1",
            params![tts_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => TtsStatus::parse(&s).ok_or_else(|| {
            StoreError::Unavailable(format!("corrupt status '{}' for artifact {}", s, tts_id))
        }),
        None => Err(StoreError::NotFound {
            entity: "tts_artifact",
            id: tts_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            db_path: dir.path().join("test.db"),
            tts_dir: dir.path().join("tts"),
            artwork_dir: dir.path().join("artwork"),
            ..StoreConfig::default()
        };
        let store = Store::open(&config).await.unwrap();
        (dir, store)
    }

    fn song(title: &str, artist: &str, epoch_ms: u64) -> NewPlayEvent {
        NewPlayEvent {
            kind: EventKind::Song,
            epoch_ms,
            title: title.to_string(),
            artist: artist.to_string(),
            album: String::new(),
            source_uri: None,
            artwork_ref: None,
            extra: serde_json::Map::new(),
        }
    }

    fn artifact(epoch_ms: u64) -> NewTtsArtifact {
        NewTtsArtifact {
            epoch_ms,
            text: "Here comes a classic.".to_string(),
            audio_path: format!("/tts/intro_{}.mp3", epoch_ms),
            transcript_path: Some(format!("/tts/intro_{}.txt", epoch_ms)),
            track_title: "Song".to_string(),
            track_artist: "Artist".to_string(),
            mode: TtsMode::Intro,
        }
    }

    #[tokio::test]
    async fn commit_then_history_returns_event_first() {
        let (_dir, store) = open_store().await;

        let id = store
            .commit_play_event(song("X", "Y", 1_000_000))
            .await
            .unwrap();
        let history = store.history(10, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.id, id);
        assert_eq!(history[0].event.title, "X");
    }

    #[tokio::test]
    async fn duplicate_within_window_is_rejected_with_existing_id() {
        let (_dir, store) = open_store().await;

        let first = store
            .commit_play_event(song("X", "Y", 1_000_000))
            .await
            .unwrap();
        let err = store
            .commit_play_event(song("X", "Y", 1_002_000))
            .await
            .unwrap_err();
        match err {
            StoreError::DuplicateEvent { existing_id } => assert_eq!(existing_id, first),
            other => panic!("expected duplicate, got {:?}", other),
        }

        // Outside the window the same track is a fresh spin.
        store
            .commit_play_event(song("X", "Y", 1_000_000 + DEDUP_WINDOW_MS + 1))
            .await
            .unwrap();
        assert_eq!(store.history(10, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dedup_lookup_finds_the_committed_event() {
        let (_dir, store) = open_store().await;

        let id = store
            .commit_play_event(song("X", "Y", 1_000_000))
            .await
            .unwrap();
        let found = store
            .lookup_by_dedup(EventKind::Song, "X".into(), "Y".into(), 1_003_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);

        let missing = store
            .lookup_by_dedup(EventKind::Song, "Other".into(), "Y".into(), 1_000_000)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn tts_status_machine_enforces_legal_transitions() {
        let (_dir, store) = open_store().await;
        let id = store.register_tts(artifact(1)).await.unwrap();

        // pending -> garbage is illegal
        let err = store
            .mark_tts(id, TtsStatus::Garbage, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        // pending -> ready -> garbage is the happy path
        store
            .mark_tts(id, TtsStatus::Ready, 4_321, Some(2_500))
            .await
            .unwrap();
        let stored = store.tts_artifact(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TtsStatus::Ready);
        assert_eq!(stored.size_bytes, 4_321);

        store.mark_tts(id, TtsStatus::Garbage, 0, None).await.unwrap();

        // garbage is terminal
        let err = store
            .mark_tts(id, TtsStatus::Ready, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn link_requires_ready_artifact() {
        let (_dir, store) = open_store().await;

        let event_id = store
            .commit_play_event(song("X", "Y", 1_000_000))
            .await
            .unwrap();
        let tts_id = store.register_tts(artifact(2)).await.unwrap();

        let err = store.link_tts(event_id, tts_id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady(_)));

        store
            .mark_tts(tts_id, TtsStatus::Ready, 2_000, None)
            .await
            .unwrap();
        store.link_tts(event_id, tts_id).await.unwrap();
    }

    #[tokio::test]
    async fn commit_and_link_surfaces_tts_text_in_history() {
        let (_dir, store) = open_store().await;

        let tts_id = store.register_tts(artifact(3)).await.unwrap();
        store
            .mark_tts(tts_id, TtsStatus::Ready, 2_000, None)
            .await
            .unwrap();

        let mut dj = song("Song", "Artist", 2_000_000);
        dj.kind = EventKind::Dj;
        store.commit_and_link(dj, tts_id).await.unwrap();

        let history = store.history(1, None).await.unwrap();
        assert_eq!(
            history[0].tts_text.as_deref(),
            Some("Here comes a classic.")
        );
    }

    #[tokio::test]
    async fn dj_events_with_failed_artifacts_stay_out_of_history() {
        let (_dir, store) = open_store().await;

        // Link while ready, then the artifact is swept to failed after a
        // simulated crash. History must not surface the event as a dj line.
        let tts_id = store.register_tts(artifact(4)).await.unwrap();
        store
            .mark_tts(tts_id, TtsStatus::Ready, 2_000, None)
            .await
            .unwrap();
        let mut dj = song("Song", "Artist", 3_000_000);
        dj.kind = EventKind::Dj;
        store.commit_and_link(dj, tts_id).await.unwrap();

        store
            .mark_tts(tts_id, TtsStatus::Garbage, 0, None)
            .await
            .unwrap();

        let history = store.history(10, None).await.unwrap();
        assert!(history.iter().all(|h| h.event.kind != EventKind::Dj));
    }

    #[tokio::test]
    async fn startup_sweeper_fails_pending_artifacts() {
        let (_dir, store) = open_store().await;

        let id = store.register_tts(artifact(5)).await.unwrap();
        let swept = store.sweep_pending().await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            store.tts_artifact(id).await.unwrap().unwrap().status,
            TtsStatus::Failed
        );

        // Sweeping again is a no-op.
        assert_eq!(store.sweep_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_pages_descending_by_id() {
        let (_dir, store) = open_store().await;

        for i in 0..5 {
            store
                .commit_play_event(song(&format!("T{}", i), "A", 1_000_000 + i * 60_000))
                .await
                .unwrap();
        }

        let page = store.history(2, None).await.unwrap();
        assert_eq!(page[0].event.title, "T4");
        assert_eq!(page[1].event.title, "T3");

        let next = store.history(2, Some(page[1].event.id)).await.unwrap();
        assert_eq!(next[0].event.title, "T2");
    }

    #[tokio::test]
    async fn retention_prunes_oldest_events() {
        let (_dir, store) = open_store().await;

        for i in 0..6 {
            store
                .commit_play_event(song(&format!("T{}", i), "A", 1_000_000 + i * 60_000))
                .await
                .unwrap();
        }
        let removed = store.prune_history(4).await.unwrap();
        assert_eq!(removed, 2);

        let history = store.history(10, None).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().unwrap().event.title, "T2");
    }

    #[tokio::test]
    async fn artwork_cache_evicts_least_recently_used_first() {
        let (_dir, store) = open_store().await;

        for (key, used) in [("a", 10_u64), ("b", 20), ("c", 30)] {
            store
                .put_artwork(ArtworkEntry {
                    key: key.to_string(),
                    artist: String::new(),
                    album: String::new(),
                    source_uri: None,
                    local_path: format!("/artwork/{}.jpg", key),
                    size_bytes: 100,
                    cached_at: used,
                    last_used_at: used,
                })
                .await
                .unwrap();
        }

        // "a" is the LRU candidate until it gets touched.
        store.touch_artwork("a".to_string()).await.unwrap();

        let evicted = store.evict_artwork_over(200).await.unwrap();
        assert_eq!(evicted, vec!["/artwork/b.jpg".to_string()]);
        assert!(store.get_artwork("a".to_string()).await.unwrap().is_some());
        assert!(store.get_artwork("b".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_collection_returns_paths_and_deletes_rows() {
        let (_dir, store) = open_store().await;

        let id = store.register_tts(artifact(6)).await.unwrap();
        store.sweep_pending().await.unwrap();

        // cutoff of zero ms catches everything created so far
        let paths = store.collect_garbage(0).await.unwrap();
        assert!(paths.iter().any(|p| p.ends_with("intro_6.mp3")));
        assert!(store.tts_artifact(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dj_spacing_window_sees_recent_dj_events() {
        let (_dir, store) = open_store().await;

        assert!(!store.dj_event_within(60_000).await.unwrap());

        let mut dj = song("Song", "Artist", now_millis());
        dj.kind = EventKind::Dj;
        store.commit_play_event(dj).await.unwrap();

        assert!(store.dj_event_within(60_000).await.unwrap());
    }
}
