//! Tiered provider registry for LLM text and TTS audio.
//!
//! Two ordered fallback families: line generators (hosted API, local models,
//! template fallback) and speech synthesizers (HTTP engines, offline synth).
//! The registry tries tiers in order and advances on timeout, rate limit,
//! upstream error, or a failed quality gate — never on a success, regardless
//! of latency. Per-tier success/failure counters feed the debug endpoint.
//!
//! The terminal tiers are special: the template generator always produces a
//! line and the offline synth always produces a playable file, so the DJ
//! pipeline is guaranteed *some* output for every job.

mod llm;
mod tts;

pub use llm::{render_template, HttpLine, TemplateLine};
pub use tts::{HttpSynth, OfflineSynth};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;

use crate::config::{Config, TextGuardrails};
use crate::dj::quality;
use crate::store::TtsMode;

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call exceeded the tier's timeout.
    #[error("provider timed out")]
    Timeout,

    /// The upstream applied rate limiting.
    #[error("provider rate limited")]
    RateLimited,

    /// The upstream failed or answered with garbage.
    #[error("provider error: {0}")]
    Upstream(String),

    /// Output failed a quality gate.
    #[error("quality reject: {0}")]
    QualityReject(String),

    /// Every tier failed.
    #[error("all provider tiers exhausted")]
    Exhausted,

    /// Local filesystem failure while handling provider output.
    #[error("provider io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Everything a line generator needs to know about the requested line.
#[derive(Debug, Clone)]
pub struct LinePrompt {
    /// Intro or outro.
    pub mode: TtsMode,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Style hint drawn for this invocation.
    pub style: String,
    /// Fully rendered prompt text for LLM tiers.
    pub prompt: String,
}

/// Result of a synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthOutput {
    /// Size of the written audio file.
    pub size_bytes: u64,
    /// Duration, when the synthesizer knows it.
    pub duration_ms: Option<u64>,
}

/// A text-producing provider tier.
#[async_trait]
pub trait LineGenerator: Send + Sync {
    /// Tier name, used for logging and counters.
    fn name(&self) -> &str;

    /// Produces one spoken line for the prompt.
    async fn generate(&self, prompt: &LinePrompt) -> ProviderResult<String>;
}

/// An audio-producing provider tier.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Tier name, used for logging and counters.
    fn name(&self) -> &str;

    /// Synthesizes `text` into `out_path`.
    async fn synthesize(&self, text: &str, out_path: &Path) -> ProviderResult<SynthOutput>;
}

#[derive(Default)]
struct TierCounters {
    success: u64,
    failure: u64,
}

/// Ordered fallback over the two provider families.
pub struct ProviderRegistry {
    llm_tiers: Vec<Arc<dyn LineGenerator>>,
    tts_tiers: Vec<Arc<dyn SpeechSynthesizer>>,
    counters: DashMap<String, TierCounters>,
}

impl ProviderRegistry {
    /// Builds a registry from explicit tier lists. The caller is responsible
    /// for putting the never-failing tiers last.
    pub fn new(
        llm_tiers: Vec<Arc<dyn LineGenerator>>,
        tts_tiers: Vec<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        Self {
            llm_tiers,
            tts_tiers,
            counters: DashMap::new(),
        }
    }

    /// Builds the production registry from configuration: configured HTTP
    /// tiers in order, then the template / offline terminals.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let mut llm_tiers: Vec<Arc<dyn LineGenerator>> = config
            .llm_tiers
            .iter()
            .map(|tier| Arc::new(HttpLine::from_config(tier, client.clone())) as Arc<dyn LineGenerator>)
            .collect();
        llm_tiers.push(Arc::new(TemplateLine::new()));

        let mut tts_tiers: Vec<Arc<dyn SpeechSynthesizer>> = config
            .tts_tiers
            .iter()
            .map(|tier| Arc::new(HttpSynth::from_config(tier, client.clone())) as Arc<dyn SpeechSynthesizer>)
            .collect();
        tts_tiers.push(Arc::new(OfflineSynth::new()));

        Self::new(llm_tiers, tts_tiers)
    }

    fn record(&self, tier: &str, ok: bool) {
        let mut counters = self.counters.entry(tier.to_string()).or_default();
        if ok {
            counters.success += 1;
        } else {
            counters.failure += 1;
        }
    }

    /// Generates one line that passes the text gates, walking tiers in order.
    ///
    /// The terminal template tier's output is returned even if a pathological
    /// guardrail configuration rejects it; the pipeline must always end up
    /// with some text.
    pub async fn generate_line(
        &self,
        prompt: &LinePrompt,
        guardrails: &TextGuardrails,
    ) -> ProviderResult<String> {
        let last = self.llm_tiers.len().saturating_sub(1);
        for (index, tier) in self.llm_tiers.iter().enumerate() {
            match tier.generate(prompt).await {
                Ok(raw) => {
                    let text = raw.trim().to_string();
                    match quality::check_text(&text, guardrails, &prompt.artist) {
                        Ok(()) => {
                            self.record(tier.name(), true);
                            return Ok(text);
                        }
                        Err(issue) => {
                            self.record(tier.name(), false);
                            if index == last {
                                log::warn!(
                                    "[Providers] Template line failed gates ({}); using it anyway",
                                    issue
                                );
                                return Ok(text);
                            }
                            log::info!(
                                "[Providers] {} rejected by quality gate ({}); advancing tier",
                                tier.name(),
                                issue
                            );
                        }
                    }
                }
                Err(e) => {
                    self.record(tier.name(), false);
                    log::warn!(
                        "[Providers] {} failed ({}); advancing tier",
                        tier.name(),
                        e
                    );
                }
            }
        }
        Err(ProviderError::Exhausted)
    }

    /// Synthesizes text to a file, walking tiers in order. Returns the
    /// output facts and the name of the tier that produced them.
    pub async fn synthesize(
        &self,
        text: &str,
        out_path: &Path,
    ) -> ProviderResult<(SynthOutput, String)> {
        for tier in &self.tts_tiers {
            match tier.synthesize(text, out_path).await {
                Ok(output) => {
                    self.record(tier.name(), true);
                    return Ok((output, tier.name().to_string()));
                }
                Err(e) => {
                    self.record(tier.name(), false);
                    log::warn!(
                        "[Providers] {} synthesis failed ({}); advancing tier",
                        tier.name(),
                        e
                    );
                }
            }
        }
        Err(ProviderError::Exhausted)
    }

    /// Per-tier success/failure counters for the debug endpoint.
    pub fn stats(&self) -> serde_json::Value {
        let mut tiers = serde_json::Map::new();
        for entry in self.counters.iter() {
            tiers.insert(
                entry.key().clone(),
                json!({
                    "success": entry.value().success,
                    "failure": entry.value().failure,
                }),
            );
        }
        serde_json::Value::Object(tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Generator with a scripted response per call.
    struct ScriptedLine {
        name: String,
        responses: Mutex<Vec<ProviderResult<String>>>,
    }

    impl ScriptedLine {
        fn new(name: &str, responses: Vec<ProviderResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl LineGenerator for ScriptedLine {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _prompt: &LinePrompt) -> ProviderResult<String> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(ProviderError::Upstream("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn prompt() -> LinePrompt {
        LinePrompt {
            mode: TtsMode::Intro,
            title: "Feeling Good".to_string(),
            artist: "Nina Simone".to_string(),
            style: "laid-back".to_string(),
            prompt: "introduce the song".to_string(),
        }
    }

    fn registry_with(llm: Vec<Arc<dyn LineGenerator>>) -> ProviderRegistry {
        ProviderRegistry::new(llm, vec![Arc::new(OfflineSynth::new())])
    }

    #[tokio::test]
    async fn quality_reject_advances_to_the_next_tier() {
        // Tier 1 emits a line containing a forbidden token; tier 2 is clean.
        let tier1 = ScriptedLine::new(
            "tier1",
            vec![Ok("This artificial set keeps Nina Simone coming".to_string())],
        );
        let tier2 = ScriptedLine::new(
            "tier2",
            vec![Ok("Up next, Nina Simone at her finest.".to_string())],
        );
        let registry = registry_with(vec![tier1, tier2]);

        let text = registry
            .generate_line(&prompt(), &TextGuardrails::default())
            .await
            .unwrap();
        assert_eq!(text, "Up next, Nina Simone at her finest.");

        let stats = registry.stats();
        assert_eq!(stats["tier1"]["failure"], 1);
        assert_eq!(stats["tier2"]["success"], 1);
    }

    #[tokio::test]
    async fn upstream_errors_advance_until_the_template_tier() {
        let tier1 = ScriptedLine::new("tier1", vec![Err(ProviderError::Timeout)]);
        let registry = registry_with(vec![tier1, Arc::new(TemplateLine::new())]);

        let text = registry
            .generate_line(&prompt(), &TextGuardrails::default())
            .await
            .unwrap();
        assert!(!text.is_empty());
        assert!(text.to_lowercase().contains("nina simone"));
    }

    #[tokio::test]
    async fn success_never_advances_tiers() {
        let tier1 = ScriptedLine::new(
            "tier1",
            vec![Ok("Here's Nina Simone, settling in for the night.".to_string())],
        );
        let tier2 = ScriptedLine::new("tier2", vec![Ok("should never be used".to_string())]);
        let registry = registry_with(vec![tier1, Arc::clone(&tier2) as Arc<dyn LineGenerator>]);

        registry
            .generate_line(&prompt(), &TextGuardrails::default())
            .await
            .unwrap();
        assert_eq!(tier2.responses.lock().len(), 1, "tier2 was not called");
    }

    #[tokio::test]
    async fn template_output_passes_all_gates() {
        let registry = registry_with(vec![Arc::new(TemplateLine::new())]);
        let guardrails = TextGuardrails::default();

        for artist in ["Nina Simone", ""] {
            let mut p = prompt();
            p.artist = artist.to_string();
            let text = registry.generate_line(&p, &guardrails).await.unwrap();
            assert!(
                quality::check_text(&text, &guardrails, artist).is_ok(),
                "template output failed gates: {:?}",
                text
            );
        }
    }
}
