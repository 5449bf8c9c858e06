//! DJ pipeline: the state machine that turns an upcoming track into a
//! spoken intro on air.
//!
//! For each new track ingested, at most one intro is produced and enqueued.
//! A job walks decide → generate text → synthesize audio → register →
//! enqueue, and can fall off the path into `failed` (provider or validation
//! trouble) or `cancelled` (duplicate, spacing gate, or the moment passed).
//!
//! Cooperative cancellation runs through the job map: every stage commits
//! its next state via [`DjPipeline::set_state`], which refuses to leave a
//! terminal state. An external `cancel` marks the job terminal, the worker's
//! next transition attempt fails, and the worker cleans up whatever artifact
//! it already produced (`MarkTTS(garbage)`).

mod job;
pub mod quality;

pub use job::{dedup_key, DjJob, JobState};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DjConfig, TextGuardrails};
use crate::engine::{EngineControl, EngineError, TtsEnqueue};
use crate::events::{DjEvent, EventEmitter};
use crate::providers::{render_template, LinePrompt, ProviderRegistry};
use crate::snapshot::MetadataCache;
use crate::store::{NewTtsArtifact, Store, TtsMode, TtsStatus};
use crate::utils::now_millis;

/// Enqueue retry policy: the initial try plus three retries on transport
/// failure.
const ENQUEUE_ATTEMPTS: u32 = 4;
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(500);

/// A request to produce one DJ line.
#[derive(Debug, Clone)]
pub struct ArmRequest {
    /// Dedup fingerprint of the target.
    pub dedup_key: String,
    /// Intro or outro.
    pub mode: TtsMode,
    /// Title of the track the line is for.
    pub track_title: String,
    /// Artist of the track the line is for.
    pub track_artist: String,
    /// Start time of the target track, or `None` for "before next track".
    pub target_epoch_ms: Option<u64>,
}

/// The DJ pipeline service. Owns the job set exclusively.
pub struct DjPipeline {
    store: Store,
    engine: Arc<dyn EngineControl>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<MetadataCache>,
    emitter: Arc<dyn EventEmitter>,
    config: DjConfig,
    guardrails: TextGuardrails,
    tts_dir: PathBuf,
    jobs: DashMap<String, DjJob>,
    waiting: Mutex<VecDeque<ArmRequest>>,
    running: AtomicUsize,
    cancel: CancellationToken,
}

impl DjPipeline {
    /// Wires the pipeline against its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        engine: Arc<dyn EngineControl>,
        registry: Arc<ProviderRegistry>,
        cache: Arc<MetadataCache>,
        emitter: Arc<dyn EventEmitter>,
        config: DjConfig,
        guardrails: TextGuardrails,
        tts_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            cache,
            emitter,
            config,
            guardrails,
            tts_dir,
            jobs: DashMap::new(),
            waiting: Mutex::new(VecDeque::new()),
            running: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Consumes scheduler fires until shutdown.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<(String, ArmRequest)>) {
        loop {
            let request = tokio::select! {
                _ = self.cancel.cancelled() => break,
                fired = triggers.recv() => match fired {
                    Some((_, request)) => request,
                    None => break,
                },
            };
            self.arm(request);
        }
        log::debug!("[DJ] Trigger pump stopped");
    }

    /// Arms a job for the request, enforcing idempotence and back-pressure.
    ///
    /// Re-arming a dedup key whose job is still non-terminal is a no-op.
    /// When all worker slots are busy the request queues FIFO (deduplicated
    /// on insertion).
    pub fn arm(self: &Arc<Self>, request: ArmRequest) {
        if let Some(existing) = self.jobs.get(&request.dedup_key) {
            if !existing.state.is_terminal() {
                log::debug!(
                    "[DJ] Ignoring duplicate arm for \"{}\" ({})",
                    request.track_title,
                    request.dedup_key
                );
                return;
            }
        }

        if self.running.load(Ordering::SeqCst) >= self.config.max_concurrent_jobs {
            let mut waiting = self.waiting.lock();
            if waiting.iter().all(|w| w.dedup_key != request.dedup_key) {
                log::debug!(
                    "[DJ] Queueing \"{}\" behind {} waiting request(s)",
                    request.track_title,
                    waiting.len()
                );
                waiting.push_back(request);
            }
            return;
        }

        self.spawn_job(request);
    }

    /// Cancels the job for a dedup key if it has not finished.
    pub fn cancel_job(&self, dedup_key: &str, reason: &str) {
        if let Some(mut job) = self.jobs.get_mut(dedup_key) {
            if !job.state.is_terminal() {
                job.state = JobState::Cancelled;
                job.error = Some(reason.to_string());
                job.updated_ms = now_millis();
                let event = state_event(&job);
                drop(job);
                log::info!("[DJ] Cancelled {} ({})", dedup_key, reason);
                self.emitter.emit_dj(event);
            }
        }
    }

    /// All tracked jobs, for the debug endpoint.
    pub fn jobs_snapshot(&self) -> Vec<DjJob> {
        let mut jobs: Vec<DjJob> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_ms.cmp(&a.created_ms));
        jobs
    }

    fn spawn_job(self: &Arc<Self>, request: ArmRequest) {
        let job = DjJob {
            job_id: Uuid::new_v4().to_string(),
            dedup_key: request.dedup_key.clone(),
            mode: request.mode,
            track_title: request.track_title.clone(),
            track_artist: request.track_artist.clone(),
            target_epoch_ms: request.target_epoch_ms,
            state: JobState::Armed,
            created_ms: now_millis(),
            updated_ms: now_millis(),
            tts_id: None,
            error: None,
        };
        self.emitter.emit_dj(state_event(&job));
        self.jobs.insert(request.dedup_key.clone(), job);
        self.running.fetch_add(1, Ordering::SeqCst);

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_job(request).await;
            pipeline.running.fetch_sub(1, Ordering::SeqCst);
            pipeline.drain_waiting();
        });
    }

    fn drain_waiting(self: &Arc<Self>) {
        let next = self.waiting.lock().pop_front();
        if let Some(request) = next {
            self.arm(request);
        }
    }

    /// Commits a state transition unless the job already reached a terminal
    /// state (e.g. an external cancellation). Returns whether the
    /// transition happened; a `false` tells the worker to stop.
    fn set_state(&self, dedup_key: &str, state: JobState, error: Option<String>) -> bool {
        let Some(mut job) = self.jobs.get_mut(dedup_key) else {
            return false;
        };
        if job.state.is_terminal() {
            return false;
        }
        job.state = state;
        job.error = error;
        job.updated_ms = now_millis();
        let event = state_event(&job);
        drop(job);
        self.emitter.emit_dj(event);
        true
    }

    fn set_tts_id(&self, dedup_key: &str, tts_id: i64) {
        if let Some(mut job) = self.jobs.get_mut(dedup_key) {
            job.tts_id = Some(tts_id);
        }
    }

    fn fail_job(&self, dedup_key: &str, reason: String) {
        log::warn!("[DJ] Job {} failed: {}", dedup_key, reason);
        self.set_state(dedup_key, JobState::Failed, Some(reason));
    }

    /// The target stopped being worth introducing: it is neither on air nor
    /// anywhere in the upcoming queue.
    fn target_obsolete(&self, title: &str, artist: &str) -> bool {
        if let Some(now) = self.cache.now_snapshot() {
            if now.title == title && now.artist == artist {
                return false;
            }
        }
        let next = self.cache.next_snapshot(usize::MAX);
        if next.is_empty() && self.cache.now_snapshot().is_none() {
            // No engine view at all; do not guess.
            return false;
        }
        !next
            .iter()
            .any(|entry| entry.title == title && entry.artist == artist)
    }

    fn build_prompt(&self, request: &ArmRequest) -> LinePrompt {
        let style = if self.config.styles.is_empty() {
            String::new()
        } else {
            self.config.styles[fastrand::usize(..self.config.styles.len())].clone()
        };
        let templates = match request.mode {
            TtsMode::Outro => &self.config.outro_templates,
            _ => &self.config.intro_templates,
        };
        let prompt = if templates.is_empty() {
            format!(
                "Write one short spoken radio line introducing \"{}\" by {}.",
                request.track_title, request.track_artist
            )
        } else {
            let template = &templates[fastrand::usize(..templates.len())];
            render_template(
                template,
                &[
                    ("title", request.track_title.as_str()),
                    ("artist", request.track_artist.as_str()),
                    ("style", style.as_str()),
                ],
            )
        };
        LinePrompt {
            mode: request.mode,
            title: request.track_title.clone(),
            artist: request.track_artist.clone(),
            style,
            prompt,
        }
    }

    async fn run_job(self: &Arc<Self>, request: ArmRequest) {
        let key = request.dedup_key.clone();

        // Freshness gate: a DJ line hit the air too recently.
        match self.store.dj_event_within(self.config.min_spacing_ms).await {
            Ok(true) => {
                self.cancel_job(&key, "dj spacing window");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                // A store hiccup must not wedge the pipeline; the dedup
                // window still protects against doubles at commit time.
                log::warn!("[DJ] Spacing check failed, continuing: {}", e);
            }
        }

        // Probability roll, unless the station has been quiet past the
        // max interval and an intro is overdue.
        if self.config.probability < 1.0 && fastrand::f64() >= self.config.probability {
            let overdue = matches!(
                self.store.dj_event_within(self.config.max_interval_ms).await,
                Ok(false)
            );
            if !overdue {
                self.cancel_job(&key, "probability roll");
                return;
            }
            log::debug!("[DJ] Intro overdue; probability roll overridden");
        }

        if !self.set_state(&key, JobState::Generating, None) {
            return;
        }

        let prompt = self.build_prompt(&request);
        // On shutdown the in-flight provider call is abandoned, not awaited.
        let generated = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.cancel_job(&key, "shutdown");
                return;
            }
            result = self.registry.generate_line(&prompt, &self.guardrails) => result,
        };
        let text = match generated {
            Ok(text) => text,
            Err(e) => {
                self.fail_job(&key, format!("text generation: {}", e));
                return;
            }
        };
        log::info!(
            "[DJ] Line for \"{}\": {}",
            request.track_title,
            text
        );

        // The moment may have passed while the model was thinking.
        if self.target_obsolete(&request.track_title, &request.track_artist) {
            self.cancel_job(&key, "target track no longer upcoming");
            return;
        }

        if !self.set_state(&key, JobState::Synthesizing, None) {
            return;
        }

        let epoch_ms = now_millis();
        let stem = format!("{}_{}", request.mode.as_str(), epoch_ms);
        let audio_path = self.tts_dir.join(format!("{}.mp3", stem));
        let transcript_path = self.tts_dir.join(format!("{}.txt", stem));

        let synthesized = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.cancel_job(&key, "shutdown");
                return;
            }
            result = self.registry.synthesize(&text, &audio_path) => result,
        };
        let synth = match synthesized {
            Ok((output, tier)) => {
                log::debug!("[DJ] Synthesized via {} ({} bytes)", tier, output.size_bytes);
                output
            }
            Err(e) => {
                self.fail_job(&key, format!("synthesis: {}", e));
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&transcript_path, &text).await {
            log::warn!("[DJ] Transcript write failed: {}", e);
        }

        let tts_id = match self
            .store
            .register_tts(NewTtsArtifact {
                epoch_ms,
                text: text.clone(),
                audio_path: audio_path.display().to_string(),
                transcript_path: Some(transcript_path.display().to_string()),
                track_title: request.track_title.clone(),
                track_artist: request.track_artist.clone(),
                mode: request.mode,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.fail_job(&key, format!("artifact registration: {}", e));
                return;
            }
        };
        self.set_tts_id(&key, tts_id);

        // Validation gate between pending and ready.
        match quality::check_audio(&audio_path, self.config.min_audio_bytes) {
            Ok(probe) => {
                if let Err(e) = self
                    .store
                    .mark_tts(tts_id, TtsStatus::Ready, probe.size_bytes, synth.duration_ms)
                    .await
                {
                    self.fail_job(&key, format!("mark ready: {}", e));
                    return;
                }
            }
            Err(issue) => {
                let _ = self.store.mark_tts(tts_id, TtsStatus::Failed, 0, None).await;
                self.fail_job(&key, format!("audio validation: {}", issue));
                return;
            }
        }

        if !self.set_state(&key, JobState::Registered, None) {
            self.discard_artifact(tts_id).await;
            return;
        }

        // Still worth playing? The intro is obsolete once the track after
        // the target went on air.
        if self.target_obsolete(&request.track_title, &request.track_artist) {
            self.cancel_job(&key, "target track played before enqueue");
            self.discard_artifact(tts_id).await;
            return;
        }

        let enqueue = TtsEnqueue {
            audio_path: audio_path.clone(),
            title: request.track_title.clone(),
            artist: request.track_artist.clone(),
            tts_id: Some(tts_id),
        };
        let mut last_error = String::new();
        for attempt in 1..=ENQUEUE_ATTEMPTS {
            match self.engine.enqueue_tts(&enqueue).await {
                Ok(()) => {
                    self.set_state(&key, JobState::Enqueued, None);
                    log::info!(
                        "[DJ] Enqueued intro for \"{}\" by {} (artifact {})",
                        request.track_title,
                        request.track_artist,
                        tts_id
                    );
                    return;
                }
                Err(EngineError::Rejected(msg)) => {
                    // Explicit refusal; retrying will not change the answer.
                    last_error = format!("engine rejected: {}", msg);
                    break;
                }
                Err(e) => {
                    last_error = e.to_string();
                    log::warn!(
                        "[DJ] Enqueue attempt {}/{} failed: {}",
                        attempt,
                        ENQUEUE_ATTEMPTS,
                        e
                    );
                    if attempt < ENQUEUE_ATTEMPTS {
                        tokio::time::sleep(ENQUEUE_BACKOFF).await;
                    }
                }
            }
        }

        self.discard_artifact(tts_id).await;
        self.fail_job(&key, format!("enqueue: {}", last_error));
    }

    /// Marks a produced artifact as garbage; the periodic GC removes the
    /// bytes later.
    async fn discard_artifact(&self, tts_id: i64) {
        if let Err(e) = self.store.mark_tts(tts_id, TtsStatus::Garbage, 0, None).await {
            log::debug!("[DJ] Discard of artifact {} failed: {}", tts_id, e);
        }
    }
}

fn state_event(job: &DjJob) -> DjEvent {
    DjEvent::StateChanged {
        job_id: job.job_id.clone(),
        state: job.state.as_str().to_string(),
        track_title: job.track_title.clone(),
        track_artist: job.track_artist.clone(),
        timestamp: job.updated_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SnapshotConfig, StoreConfig};
    use crate::engine::{EngineHealth, EngineResult, NowPlaying, TrackRef};
    use crate::events::NoopEventEmitter;
    use crate::providers::{OfflineSynth, TemplateLine};
    use crate::store::{EventKind, NewPlayEvent};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Engine stub: serves a fixed now/upcoming pair and records enqueues.
    struct StubEngine {
        now: Mutex<Option<NowPlaying>>,
        upcoming: Mutex<Vec<TrackRef>>,
        enqueued: Mutex<Vec<TtsEnqueue>>,
        enqueue_failures: AtomicUsize,
    }

    impl StubEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(None),
                upcoming: Mutex::new(Vec::new()),
                enqueued: Mutex::new(Vec::new()),
                enqueue_failures: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EngineControl for StubEngine {
        async fn now(&self) -> EngineResult<Option<NowPlaying>> {
            Ok(self.now.lock().clone())
        }

        async fn upcoming(&self, n: usize) -> EngineResult<Vec<TrackRef>> {
            Ok(self.upcoming.lock().iter().take(n).cloned().collect())
        }

        async fn enqueue_tts(&self, item: &TtsEnqueue) -> EngineResult<()> {
            if self.enqueue_failures.load(Ordering::SeqCst) > 0 {
                self.enqueue_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Unavailable("blip".into()));
            }
            self.enqueued.lock().push(item.clone());
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
        engine: Arc<StubEngine>,
        cache: Arc<MetadataCache>,
        pipeline: Arc<DjPipeline>,
    }

    async fn fixture(config: DjConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store_config = StoreConfig {
            db_path: dir.path().join("test.db"),
            tts_dir: dir.path().join("tts"),
            artwork_dir: dir.path().join("artwork"),
            ..StoreConfig::default()
        };
        let store = Store::open(&store_config).await.unwrap();
        let engine = StubEngine::new();
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&engine) as Arc<dyn EngineControl>,
            store.clone(),
            SnapshotConfig::default(),
        ));
        let registry = Arc::new(ProviderRegistry::new(
            vec![Arc::new(TemplateLine::new())],
            vec![Arc::new(OfflineSynth::new())],
        ));
        let pipeline = Arc::new(DjPipeline::new(
            store.clone(),
            Arc::clone(&engine) as Arc<dyn EngineControl>,
            registry,
            Arc::clone(&cache),
            Arc::new(NoopEventEmitter),
            config,
            TextGuardrails::default(),
            store_config.tts_dir.clone(),
            CancellationToken::new(),
        ));
        Fixture {
            _dir: dir,
            store,
            engine,
            cache,
            pipeline,
        }
    }

    fn request_for(title: &str, artist: &str) -> ArmRequest {
        ArmRequest {
            dedup_key: dedup_key(title, artist, None),
            mode: TtsMode::Intro,
            track_title: title.to_string(),
            track_artist: artist.to_string(),
            target_epoch_ms: None,
        }
    }

    async fn wait_for_terminal(pipeline: &Arc<DjPipeline>, key: &str) -> DjJob {
        for _ in 0..400 {
            if let Some(job) = pipeline.jobs.get(key) {
                if job.state.is_terminal() {
                    return job.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn happy_path_produces_a_ready_artifact_and_enqueues_it() {
        let fx = fixture(DjConfig::default()).await;

        // Target track is first in the upcoming queue.
        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Feeling Good".to_string(),
            artist: "Nina Simone".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;

        let request = request_for("Feeling Good", "Nina Simone");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Enqueued);

        let tts_id = job.tts_id.unwrap();
        let artifact = fx.store.tts_artifact(tts_id).await.unwrap().unwrap();
        assert_eq!(artifact.status, TtsStatus::Ready);
        assert!(artifact.size_bytes > 1_000);
        assert!(artifact.text.contains("Nina Simone"));

        let enqueued = fx.engine.enqueued.lock();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].tts_id, Some(tts_id));
    }

    #[tokio::test]
    async fn rearming_a_live_job_is_a_no_op() {
        let mut config = DjConfig::default();
        config.max_concurrent_jobs = 1;
        let fx = fixture(config).await;

        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request.clone());
        fx.pipeline.arm(request);

        wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(fx.engine.enqueued.lock().len(), 1);
    }

    #[tokio::test]
    async fn spacing_gate_cancels_before_generation() {
        let fx = fixture(DjConfig::default()).await;

        // A DJ line just hit the air.
        fx.store
            .commit_play_event(NewPlayEvent {
                kind: EventKind::Dj,
                epoch_ms: now_millis(),
                title: "Previous intro".to_string(),
                artist: String::new(),
                album: String::new(),
                source_uri: None,
                artwork_ref: None,
                extra: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Cancelled);
        assert!(fx.engine.enqueued.lock().is_empty());
    }

    #[tokio::test]
    async fn probability_zero_cancels_unless_overdue() {
        let mut config = DjConfig::default();
        config.probability = 0.0;
        let fx = fixture(config).await;

        // A DJ line aired a minute ago: outside min spacing, inside the max
        // interval, so the roll applies and zero probability cancels.
        fx.store
            .commit_play_event(NewPlayEvent {
                kind: EventKind::Dj,
                epoch_ms: now_millis() - 60_000,
                title: "Earlier intro".to_string(),
                artist: String::new(),
                album: String::new(),
                source_uri: None,
                artwork_ref: None,
                extra: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn overdue_station_overrides_the_probability_roll() {
        let mut config = DjConfig::default();
        config.probability = 0.0;
        let fx = fixture(config).await;

        // No DJ line has ever aired: the intro is overdue, the roll is
        // skipped, and the job runs to completion.
        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Enqueued);
    }

    #[tokio::test]
    async fn obsolete_target_cancels_the_job() {
        let fx = fixture(DjConfig::default()).await;

        // The engine knows a now + next, and the target is neither.
        *fx.engine.now.lock() = Some(NowPlaying {
            title: "Other".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
            duration_ms: None,
        });
        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Also Other".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn transport_blips_are_retried_then_succeed() {
        let fx = fixture(DjConfig::default()).await;

        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;
        fx.engine.enqueue_failures.store(2, Ordering::SeqCst);

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Enqueued);
        assert_eq!(fx.engine.enqueued.lock().len(), 1);
    }

    #[tokio::test]
    async fn persistent_enqueue_failure_marks_the_artifact_garbage() {
        let fx = fixture(DjConfig::default()).await;

        *fx.engine.upcoming.lock() = vec![TrackRef {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: String::new(),
            source_uri: None,
        }];
        fx.cache.refresh().await;
        fx.engine.enqueue_failures.store(10, Ordering::SeqCst);

        let request = request_for("Song", "Band");
        let key = request.dedup_key.clone();
        fx.pipeline.arm(request);

        let job = wait_for_terminal(&fx.pipeline, &key).await;
        assert_eq!(job.state, JobState::Failed);
        let artifact = fx.store.tts_artifact(job.tts_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(artifact.status, TtsStatus::Garbage);
    }
}
