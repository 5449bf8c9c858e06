//! Metadata cache: the single owner of presentation state.
//!
//! One periodic task polls the engine adapter for the on-air track and the
//! upcoming queue, so no other component ever polls the engine for
//! presentation data. Clients read the cached snapshots.
//!
//! Two invariants live here:
//! - `track_started_at_ms` is preserved across refreshes that observe the
//!   same `(title, artist)`, which keeps client progress bars stable across
//!   page reloads.
//! - after `staleness_cap` without a successful engine read the snapshots are
//!   reported as stale, and the flag clears on the next successful poll.
//!
//! The cache never writes to the store (reads only, for artwork enrichment)
//! and never emits events itself: on an observed track change it hands the
//! observation to the ingest backstop, which owns commit-then-broadcast
//! ordering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SnapshotConfig;
use crate::engine::{EngineControl, NowPlaying};
use crate::store::Store;
use crate::utils::{artwork_key_for_album, now_millis};

/// Derived view of the on-air track.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowSnapshot {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when unknown.
    pub album: String,
    /// Artwork cache key, when cover art is cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
    /// When this track was first observed playing (Unix milliseconds).
    pub track_started_at_ms: u64,
    /// When this snapshot was captured (Unix milliseconds).
    pub captured_at_ms: u64,
    /// Track duration reported by the engine, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One entry of the upcoming-tracks view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEntry {
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Album, empty when unknown.
    pub album: String,
    /// Source URI of the media.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    /// Artwork cache key, when cover art is cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_ref: Option<String>,
}

/// Receives track-change observations made by the poller.
///
/// Implemented by the ingest service; a trait seam so the cache can be
/// exercised without the full ingest stack.
#[async_trait]
pub trait ChangeBackstop: Send + Sync {
    /// Called once per observed `(title, artist)` change.
    async fn track_observed(&self, now: &NowPlaying);
}

struct CacheState {
    now: Option<NowSnapshot>,
    next: Vec<NextEntry>,
    last_ok: Option<Instant>,
}

/// Single-owner poller of engine presentation state.
pub struct MetadataCache {
    engine: Arc<dyn EngineControl>,
    store: Store,
    config: SnapshotConfig,
    state: RwLock<CacheState>,
    /// Set after construction; ingest depends on the cache for next-track
    /// prediction, so the backstop edge is wired late.
    backstop: RwLock<Option<Arc<dyn ChangeBackstop>>>,
}

impl MetadataCache {
    /// Creates the cache. Call [`MetadataCache::set_backstop`] before
    /// starting the poll loop.
    pub fn new(engine: Arc<dyn EngineControl>, store: Store, config: SnapshotConfig) -> Self {
        Self {
            engine,
            store,
            config,
            state: RwLock::new(CacheState {
                now: None,
                next: Vec::new(),
                last_ok: None,
            }),
            backstop: RwLock::new(None),
        }
    }

    /// Wires the ingest backstop for observed track changes.
    pub fn set_backstop(&self, backstop: Arc<dyn ChangeBackstop>) {
        *self.backstop.write() = Some(backstop);
    }

    /// Whether the snapshots have outlived the staleness cap.
    pub fn is_stale(&self) -> bool {
        let cap = Duration::from_secs(self.config.staleness_cap_secs);
        match self.state.read().last_ok {
            Some(at) => at.elapsed() > cap,
            None => true,
        }
    }

    /// Returns the cached on-air snapshot, if any track has been observed.
    pub fn now_snapshot(&self) -> Option<NowSnapshot> {
        self.state.read().now.clone()
    }

    /// Returns up to `limit` upcoming entries (capped by the configured
    /// snapshot size).
    pub fn next_snapshot(&self, limit: usize) -> Vec<NextEntry> {
        let state = self.state.read();
        state
            .next
            .iter()
            .take(limit.min(self.config.upcoming_limit))
            .cloned()
            .collect()
    }

    /// First upcoming entry; what the DJ pipeline will introduce.
    pub fn predicted_next(&self) -> Option<NextEntry> {
        self.state.read().next.first().cloned()
    }

    /// One poll: reads now + upcoming from the engine and folds them into
    /// the cached snapshots. Public so tests can drive ticks directly.
    pub async fn refresh(&self) {
        let now_result = self.engine.now().await;
        let observed = match now_result {
            Ok(observed) => observed,
            Err(e) => {
                log::debug!("[Snapshot] Engine read failed: {}", e);
                return;
            }
        };

        let upcoming = match self.engine.upcoming(self.config.upcoming_limit).await {
            Ok(entries) => Some(entries),
            Err(e) => {
                // Keep the previous queue view; now() succeeded, so the
                // snapshot as a whole still counts as fresh.
                log::debug!("[Snapshot] Upcoming read failed: {}", e);
                None
            }
        };

        // Artwork enrichment goes through the store only (never the engine).
        let next = match upcoming {
            Some(entries) => {
                let mut next = Vec::with_capacity(entries.len());
                for entry in entries {
                    let artwork_ref = self.cached_artwork_key(&entry.artist, &entry.album).await;
                    next.push(NextEntry {
                        title: entry.title,
                        artist: entry.artist,
                        album: entry.album,
                        source_uri: entry.source_uri,
                        artwork_ref,
                    });
                }
                Some(next)
            }
            None => None,
        };

        let now_art = match &observed {
            Some(playing) => self.cached_artwork_key(&playing.artist, &playing.album).await,
            None => None,
        };

        let changed = {
            let mut state = self.state.write();
            state.last_ok = Some(Instant::now());
            if let Some(next) = next {
                state.next = next;
            }

            match observed.as_ref() {
                Some(playing) => {
                    let same_track = state.now.as_ref().is_some_and(|prev| {
                        prev.title == playing.title && prev.artist == playing.artist
                    });
                    let started_at = if same_track {
                        state.now.as_ref().map(|p| p.track_started_at_ms).unwrap_or_else(now_millis)
                    } else {
                        now_millis()
                    };
                    state.now = Some(NowSnapshot {
                        title: playing.title.clone(),
                        artist: playing.artist.clone(),
                        album: playing.album.clone(),
                        artwork_ref: now_art,
                        track_started_at_ms: started_at,
                        captured_at_ms: now_millis(),
                        duration_ms: playing.duration_ms,
                    });
                    !same_track
                }
                None => {
                    state.now = None;
                    false
                }
            }
        };

        if changed {
            if let Some(playing) = observed {
                log::info!(
                    "[Snapshot] Track change observed: \"{}\" by {}",
                    playing.title,
                    playing.artist
                );
                let backstop = self.backstop.read().clone();
                if let Some(backstop) = backstop {
                    backstop.track_observed(&playing).await;
                }
            }
        }
    }

    async fn cached_artwork_key(&self, artist: &str, album: &str) -> Option<String> {
        if artist.is_empty() && album.is_empty() {
            return None;
        }
        let key = artwork_key_for_album(artist, album);
        match self.store.get_artwork(key.clone()).await {
            Ok(Some(_)) => Some(key),
            Ok(None) => None,
            Err(e) => {
                // A store outage must not stall the snapshot path.
                log::debug!("[Snapshot] Artwork lookup failed: {}", e);
                None
            }
        }
    }

    /// Runs the poll loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
            }
        }
        log::debug!("[Snapshot] Poller stopped");
    }
}
