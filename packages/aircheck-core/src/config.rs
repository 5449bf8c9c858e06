//! Core application configuration types.
//!
//! All sections have sensible defaults; [`Config::validate`] rejects values
//! that would cause runtime misbehavior (zero capacities, empty queue names,
//! inverted text bounds).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Endpoints and naming for the external audio engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Host of the engine's line-oriented control port.
    pub control_host: String,

    /// Port of the engine's control port.
    pub control_port: u16,

    /// Name of the engine queue that receives DJ audio (`<queue>.push`).
    pub queue: String,

    /// Name of the engine output used for skip commands (`output.<name>.skip`).
    pub skip_output: String,

    /// Optional HTTP ingestion endpoint (`PUT <ingest_url>`); preferred for
    /// audio submission when configured because it avoids control-plane
    /// interleaving.
    pub ingest_url: Option<String>,

    /// Timeout for a single control command (milliseconds).
    pub command_timeout_ms: u64,

    /// Timeout for audio enqueue operations (milliseconds).
    pub enqueue_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_host: "127.0.0.1".to_string(),
            control_port: 1234,
            queue: "ttsq".to_string(),
            skip_output: "radio".to_string(),
            ingest_url: None,
            command_timeout_ms: 1_000,
            enqueue_timeout_ms: 3_000,
        }
    }
}

/// Storage paths and retention policy.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,

    /// Directory receiving synthesized audio and transcript sidecars.
    pub tts_dir: PathBuf,

    /// Directory receiving cached artwork images.
    pub artwork_dir: PathBuf,

    /// Artwork cache size cap in bytes; LRU eviction above this.
    pub artwork_cache_cap_bytes: u64,

    /// Number of play events to retain (older rows are pruned).
    pub history_retention: u32,

    /// Age in seconds after which `garbage`/`failed` artifacts are deleted.
    pub artifact_gc_age_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/aircheck.db"),
            tts_dir: PathBuf::from("./data/tts"),
            artwork_dir: PathBuf::from("./data/artwork"),
            artwork_cache_cap_bytes: 64 * 1024 * 1024,
            history_retention: 5_000,
            artifact_gc_age_secs: 24 * 60 * 60,
        }
    }
}

/// Metadata cache (now/next poller) tuning.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Interval between engine polls (seconds).
    pub tick_interval_secs: u64,

    /// How long cached snapshots stay fresh after the last successful engine
    /// read (seconds).
    pub staleness_cap_secs: u64,

    /// Maximum entries in the upcoming-tracks snapshot.
    pub upcoming_limit: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3,
            staleness_cap_secs: 30,
            upcoming_limit: 8,
        }
    }
}

/// DJ pipeline behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DjConfig {
    /// Delay after a track starts before the intro job for the next track
    /// fires (milliseconds).
    pub delay_ms: u64,

    /// Minimum spacing between DJ lines on air (milliseconds); jobs armed
    /// inside this window are cancelled.
    pub min_spacing_ms: u64,

    /// Once no DJ line aired for this long, the probability roll is skipped
    /// and the next job always proceeds (milliseconds).
    pub max_interval_ms: u64,

    /// Maximum non-terminal jobs at once; excess arms queue FIFO.
    pub max_concurrent_jobs: usize,

    /// Probability that an upcoming track gets an intro at all (0.0-1.0).
    pub probability: f64,

    /// Style hints; one is drawn at random per generation.
    pub styles: Vec<String>,

    /// Prompt templates for intro lines (`{title}`/`{artist}`/`{style}`).
    pub intro_templates: Vec<String>,

    /// Prompt templates for outro lines.
    pub outro_templates: Vec<String>,

    /// Minimum size of a synthesized audio file (bytes).
    pub min_audio_bytes: u64,
}

impl Default for DjConfig {
    fn default() -> Self {
        Self {
            delay_ms: 30_000,
            min_spacing_ms: 45_000,
            max_interval_ms: 30 * 60 * 1_000,
            max_concurrent_jobs: 1,
            probability: 1.0,
            styles: vec![
                "laid-back".to_string(),
                "energetic".to_string(),
                "late-night".to_string(),
            ],
            intro_templates: vec![
                "You're listening to the all-night mix. Write one short spoken line, {style}, introducing \"{title}\" by {artist}. Sound like a human radio host.".to_string(),
            ],
            outro_templates: vec![
                "Write one short spoken line, {style}, wrapping up \"{title}\" by {artist}. Sound like a human radio host.".to_string(),
            ],
            min_audio_bytes: 1_000,
        }
    }
}

/// Guardrails applied to generated DJ text.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TextGuardrails {
    /// Minimum accepted length in characters.
    pub min_chars: usize,

    /// Maximum accepted length in characters.
    pub max_chars: usize,

    /// Words that must not appear (case-insensitive, whole-word match).
    pub forbidden: Vec<String>,
}

impl Default for TextGuardrails {
    fn default() -> Self {
        Self {
            min_chars: 6,
            max_chars: 200,
            forbidden: vec![
                "ai".to_string(),
                "artificial".to_string(),
                "algorithm".to_string(),
                "database".to_string(),
                "model".to_string(),
                "generated".to_string(),
            ],
        }
    }
}

/// One LLM provider tier.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmTierConfig {
    /// Display name, also used for counter keys.
    pub name: String,

    /// Chat-completions endpoint URL.
    pub url: String,

    /// Model identifier sent in the request body.
    pub model: String,

    /// Per-call timeout (seconds).
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retries before the tier is considered failed.
    #[serde(default)]
    pub retries: u32,

    /// Delay before retrying after a rate-limit response (milliseconds).
    #[serde(default)]
    pub rate_limit_delay_ms: u64,

    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_llm_timeout() -> u64 {
    30
}

/// One TTS provider tier.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsTierConfig {
    /// Display name, also used for counter keys.
    pub name: String,

    /// Synthesis endpoint URL.
    pub url: String,

    /// Voice selector passed to the engine.
    #[serde(default)]
    pub voice: Option<String>,

    /// Per-call timeout (seconds).
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,

    /// Retries before the tier is considered failed.
    #[serde(default)]
    pub retries: u32,

    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_tts_timeout() -> u64 {
    60
}

/// Event-bus and WebSocket tuning.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of each subscriber's event buffer; the oldest frame is
    /// dropped when a subscriber lags past it.
    pub channel_capacity: usize,

    /// Timeout for a single WebSocket write (milliseconds).
    pub ws_write_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            ws_write_timeout_ms: 2_000,
        }
    }
}

/// Configuration for the Aircheck coordination core.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Audio engine endpoints.
    pub engine: EngineConfig,

    /// Storage paths and retention.
    pub store: StoreConfig,

    /// Now/next poller tuning.
    pub snapshot: SnapshotConfig,

    /// DJ pipeline behavior.
    pub dj: DjConfig,

    /// Generated-text guardrails.
    pub text: TextGuardrails,

    /// Ordered LLM tiers; the template fallback is implicit and always last.
    pub llm_tiers: Vec<LlmTierConfig>,

    /// Ordered TTS tiers; the offline synth fallback is implicit and always last.
    pub tts_tiers: Vec<TtsTierConfig>,

    /// Event-bus and WebSocket tuning.
    pub bus: BusConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.queue.is_empty() {
            return Err("engine.queue must not be empty".to_string());
        }
        if self.engine.skip_output.is_empty() {
            return Err("engine.skip_output must not be empty".to_string());
        }
        if self.snapshot.upcoming_limit == 0 {
            return Err("snapshot.upcoming_limit must be >= 1".to_string());
        }
        if self.snapshot.tick_interval_secs == 0 {
            return Err("snapshot.tick_interval_secs must be >= 1".to_string());
        }
        if self.dj.max_concurrent_jobs == 0 {
            return Err("dj.max_concurrent_jobs must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.dj.probability) {
            return Err("dj.probability must be within 0.0..=1.0".to_string());
        }
        if self.dj.max_interval_ms < self.dj.min_spacing_ms {
            return Err("dj.max_interval_ms must be >= dj.min_spacing_ms".to_string());
        }
        if self.text.min_chars >= self.text.max_chars {
            return Err("text.min_chars must be < text.max_chars".to_string());
        }
        if self.bus.channel_capacity == 0 {
            return Err(
                "bus.channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}
