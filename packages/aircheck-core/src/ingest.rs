//! Ingest: the single entry point for track-change events.
//!
//! Events arrive from the engine's track-change webhook and, as a backstop,
//! from the metadata cache's own change detection. Each event is normalized,
//! committed through the store's dedup window, and only then broadcast —
//! subscribers never see an event that cannot be read back. A committed song
//! event also re-arms the DJ timer for the predicted next track.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::DjConfig;
use crate::dj::{dedup_key, ArmRequest};
use crate::engine::NowPlaying;
use crate::events::{EventEmitter, HistoryEvent, TrackEvent};
use crate::scheduler::Scheduler;
use crate::snapshot::{ChangeBackstop, MetadataCache};
use crate::store::{EventKind, NewPlayEvent, Store, StoreError, TtsMode};
use crate::utils::{artwork_key_for_album, clamp_epoch_ms, normalize_tag, now_millis};

/// A raw inbound track event, before normalization.
#[derive(Debug, Clone)]
pub struct TrackEventIn {
    /// Event kind.
    pub kind: EventKind,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, when known.
    pub album: String,
    /// Source URI of the media.
    pub source_uri: Option<String>,
    /// Sender-reported event time; clamped to ±1 day of server time.
    pub epoch_ms: Option<u64>,
    /// Opaque key/value bag (annotate metadata round-trips here).
    pub extra: serde_json::Map<String, Value>,
}

/// What happened to an ingested event.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    /// Id of the committed (or previously committed) event.
    pub event_id: i64,
    /// Whether the dedup window swallowed this report.
    pub deduped: bool,
}

/// Normalizes, commits, broadcasts, and arms the DJ timer.
pub struct Ingestor {
    store: Store,
    emitter: Arc<dyn EventEmitter>,
    scheduler: Arc<Scheduler<ArmRequest>>,
    cache: Arc<MetadataCache>,
    dj_config: DjConfig,
    /// Dedup key of the most recently armed DJ timer; cancelled when the
    /// next song event arrives.
    last_armed: Mutex<Option<String>>,
}

impl Ingestor {
    /// Wires the ingest service.
    pub fn new(
        store: Store,
        emitter: Arc<dyn EventEmitter>,
        scheduler: Arc<Scheduler<ArmRequest>>,
        cache: Arc<MetadataCache>,
        dj_config: DjConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            scheduler,
            cache,
            dj_config,
            last_armed: Mutex::new(None),
        }
    }

    /// Ingests one event. Duplicate reports resolve to the already-committed
    /// event with `deduped = true`.
    pub async fn ingest(&self, raw: TrackEventIn) -> Result<IngestOutcome, StoreError> {
        let title = normalize_tag(&raw.title);
        let artist = normalize_tag(&raw.artist);
        let album = normalize_tag(&raw.album);
        let epoch_ms = clamp_epoch_ms(raw.epoch_ms);
        let artwork_ref = (!artist.is_empty() || !album.is_empty())
            .then(|| artwork_key_for_album(&artist, &album));

        let linked_tts = match raw.kind {
            EventKind::Dj => extra_tts_id(&raw.extra),
            EventKind::Song => None,
        };

        let event = NewPlayEvent {
            kind: raw.kind,
            epoch_ms,
            title: title.clone(),
            artist: artist.clone(),
            album: album.clone(),
            source_uri: raw.source_uri,
            artwork_ref: artwork_ref.clone(),
            extra: raw.extra,
        };

        let committed = match linked_tts {
            Some(tts_id) => match self.store.commit_and_link(event.clone(), tts_id).await {
                // The annotate pointed at an artifact that is not ready
                // (e.g. swept after a crash). Keep the play event, drop the
                // link; the artifact stays visible via the debug surface.
                Err(StoreError::NotReady(_)) | Err(StoreError::NotFound { .. }) => {
                    log::warn!(
                        "[Ingest] DJ event referenced unusable artifact {}; committing unlinked",
                        tts_id
                    );
                    self.store.commit_play_event(event).await
                }
                other => other,
            },
            None => self.store.commit_play_event(event).await,
        };

        let event_id = match committed {
            Ok(id) => id,
            Err(StoreError::DuplicateEvent { existing_id }) => {
                log::debug!(
                    "[Ingest] Deduped \"{}\" by {} (existing id {})",
                    title,
                    artist,
                    existing_id
                );
                return Ok(IngestOutcome {
                    event_id: existing_id,
                    deduped: true,
                });
            }
            Err(e) => return Err(e),
        };

        log::info!(
            "[Ingest] Committed {} event {}: \"{}\" by {}",
            raw.kind,
            event_id,
            title,
            artist
        );

        // Broadcasts happen-after the commit succeeded.
        self.emitter.emit_history(HistoryEvent::Appended {
            id: event_id,
            kind: raw.kind.to_string(),
            title: title.clone(),
            artist: artist.clone(),
            epoch_ms,
            timestamp: now_millis(),
        });

        if raw.kind == EventKind::Song {
            self.emitter.emit_track(TrackEvent::Changed {
                title,
                artist,
                album,
                artwork_ref,
                started_at_ms: epoch_ms,
                timestamp: now_millis(),
            });
            self.arm_next_dj();
        }

        Ok(IngestOutcome {
            event_id,
            deduped: false,
        })
    }

    /// Cancels the previous DJ timer and arms one for the predicted next
    /// track. The prediction comes from the metadata cache's upcoming view.
    fn arm_next_dj(&self) {
        if let Some(previous) = self.last_armed.lock().take() {
            self.scheduler.cancel(&previous);
        }

        let Some(next) = self.cache.predicted_next() else {
            log::debug!("[Ingest] No upcoming track known; DJ timer not armed");
            return;
        };

        let key = dedup_key(&next.title, &next.artist, None);
        let request = ArmRequest {
            dedup_key: key.clone(),
            mode: TtsMode::Intro,
            track_title: next.title.clone(),
            track_artist: next.artist.clone(),
            target_epoch_ms: None,
        };
        self.scheduler.arm_after(
            key.clone(),
            Duration::from_millis(self.dj_config.delay_ms),
            request,
        );
        log::debug!(
            "[Ingest] DJ timer armed for \"{}\" by {} in {} ms",
            next.title,
            next.artist,
            self.dj_config.delay_ms
        );
        *self.last_armed.lock() = Some(key);
    }
}

/// Pulls a `tts_id` out of annotate metadata, tolerating string or number.
fn extra_tts_id(extra: &serde_json::Map<String, Value>) -> Option<i64> {
    match extra.get("tts_id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl ChangeBackstop for Ingestor {
    async fn track_observed(&self, now: &NowPlaying) {
        let event = TrackEventIn {
            kind: EventKind::Song,
            title: now.title.clone(),
            artist: now.artist.clone(),
            album: now.album.clone(),
            source_uri: now.source_uri.clone(),
            epoch_ms: None,
            extra: serde_json::Map::new(),
        };
        // The webhook usually reported this already; the dedup window makes
        // the backstop harmless when it did.
        if let Err(e) = self.ingest(event).await {
            log::warn!("[Ingest] Backstop ingest failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SnapshotConfig, StoreConfig};
    use crate::engine::{EngineControl, EngineHealth, EngineResult, TrackRef, TtsEnqueue};
    use crate::events::{BroadcastEventBridge, RadioEvent};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct StaticEngine {
        upcoming: Vec<TrackRef>,
    }

    #[async_trait]
    impl EngineControl for StaticEngine {
        async fn now(&self) -> EngineResult<Option<NowPlaying>> {
            Ok(None)
        }

        async fn upcoming(&self, n: usize) -> EngineResult<Vec<TrackRef>> {
            Ok(self.upcoming.iter().take(n).cloned().collect())
        }

        async fn enqueue_tts(&self, _item: &TtsEnqueue) -> EngineResult<()> {
            Ok(())
        }

        async fn skip(&self) -> EngineResult<()> {
            Ok(())
        }

        fn health(&self) -> EngineHealth {
            EngineHealth {
                connected: true,
                last_ok_ms: None,
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Store,
        bridge: Arc<BroadcastEventBridge>,
        scheduler: Arc<Scheduler<ArmRequest>>,
        _fire_rx: mpsc::Receiver<(String, ArmRequest)>,
        ingestor: Ingestor,
    }

    async fn fixture(upcoming: Vec<TrackRef>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store_config = StoreConfig {
            db_path: dir.path().join("test.db"),
            tts_dir: dir.path().join("tts"),
            artwork_dir: dir.path().join("artwork"),
            ..StoreConfig::default()
        };
        let store = Store::open(&store_config).await.unwrap();
        let bridge = Arc::new(BroadcastEventBridge::new(16));
        let (scheduler, fire_rx) = Scheduler::new(16);
        let engine = Arc::new(StaticEngine { upcoming });
        let cache = Arc::new(MetadataCache::new(
            engine as Arc<dyn EngineControl>,
            store.clone(),
            SnapshotConfig::default(),
        ));
        cache.refresh().await;

        let ingestor = Ingestor::new(
            store.clone(),
            Arc::clone(&bridge) as Arc<dyn EventEmitter>,
            Arc::clone(&scheduler),
            cache,
            DjConfig::default(),
        );
        Fixture {
            _dir: dir,
            store,
            bridge,
            scheduler,
            _fire_rx: fire_rx,
            ingestor,
        }
    }

    fn song_event(title: &str, artist: &str, epoch_ms: u64) -> TrackEventIn {
        TrackEventIn {
            kind: EventKind::Song,
            title: title.to_string(),
            artist: artist.to_string(),
            album: String::new(),
            source_uri: None,
            epoch_ms: Some(epoch_ms),
            extra: serde_json::Map::new(),
        }
    }

    fn next(title: &str, artist: &str) -> TrackRef {
        TrackRef {
            title: title.to_string(),
            artist: artist.to_string(),
            album: String::new(),
            source_uri: None,
        }
    }

    #[tokio::test]
    async fn repeated_event_is_deduped_and_history_has_one_entry() {
        let fx = fixture(vec![]).await;
        let epoch = now_millis();

        let first = fx.ingestor.ingest(song_event("X", "Y", epoch)).await.unwrap();
        assert!(!first.deduped);

        let second = fx
            .ingestor
            .ingest(song_event("X", "Y", epoch + 2_000))
            .await
            .unwrap();
        assert!(second.deduped);
        assert_eq!(second.event_id, first.event_id);

        let history = fx.store.history(2, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.title, "X");
    }

    #[tokio::test]
    async fn commit_is_broadcast_after_it_succeeds() {
        let fx = fixture(vec![]).await;
        let mut rx = fx.bridge.subscribe();

        let outcome = fx
            .ingestor
            .ingest(song_event("X", "Y", now_millis()))
            .await
            .unwrap();

        // history_appended carries the id the store just assigned, and the
        // store can already serve it.
        match rx.recv().await.unwrap() {
            RadioEvent::History(HistoryEvent::Appended { id, .. }) => {
                assert_eq!(id, outcome.event_id);
            }
            other => panic!("expected history event, got {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), RadioEvent::Track(_)));
        assert_eq!(fx.store.history(1, None).await.unwrap()[0].event.id, outcome.event_id);
    }

    #[tokio::test]
    async fn deduped_event_does_not_broadcast() {
        let fx = fixture(vec![]).await;
        let epoch = now_millis();
        fx.ingestor.ingest(song_event("X", "Y", epoch)).await.unwrap();

        let mut rx = fx.bridge.subscribe();
        fx.ingestor
            .ingest(song_event("X", "Y", epoch + 1_000))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn song_event_arms_the_dj_timer_for_the_predicted_next() {
        let fx = fixture(vec![next("Bt", "Ba")]).await;

        fx.ingestor
            .ingest(song_event("A", "Band", now_millis()))
            .await
            .unwrap();

        let key = dedup_key("Bt", "Ba", None);
        assert!(fx.scheduler.is_armed(&key));
    }

    #[tokio::test]
    async fn new_song_event_replaces_the_previous_timer() {
        let fx = fixture(vec![next("Bt", "Ba")]).await;

        fx.ingestor
            .ingest(song_event("A", "Band", now_millis()))
            .await
            .unwrap();
        let first_key = dedup_key("Bt", "Ba", None);
        assert!(fx.scheduler.is_armed(&first_key));

        // Next song arrives (same predicted next in this fixture); the old
        // timer is cancelled before the new one is armed.
        fx.ingestor
            .ingest(song_event("B", "Band", now_millis()))
            .await
            .unwrap();
        assert!(fx.scheduler.is_armed(&first_key));
    }

    #[tokio::test]
    async fn titles_are_normalized_before_commit() {
        let fx = fixture(vec![]).await;

        let outcome = fx
            .ingestor
            .ingest(song_event("  Cafe\u{0301} Blues  ", "Band", now_millis()))
            .await
            .unwrap();
        assert!(!outcome.deduped);

        let history = fx.store.history(1, None).await.unwrap();
        assert_eq!(history[0].event.title, "Caf\u{e9} Blues");
    }

    #[tokio::test]
    async fn dj_event_with_unusable_artifact_commits_unlinked() {
        let fx = fixture(vec![]).await;

        let mut extra = serde_json::Map::new();
        extra.insert("tts_id".to_string(), Value::String("999".to_string()));
        let event = TrackEventIn {
            kind: EventKind::Dj,
            title: "Intro".to_string(),
            artist: String::new(),
            album: String::new(),
            source_uri: None,
            epoch_ms: Some(now_millis()),
            extra,
        };
        let outcome = fx.ingestor.ingest(event).await.unwrap();
        assert!(!outcome.deduped);
    }
}
