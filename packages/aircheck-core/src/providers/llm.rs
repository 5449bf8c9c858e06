//! Line generator tiers: HTTP chat endpoints and the template fallback.

use async_trait::async_trait;
use serde_json::json;

use super::{LineGenerator, LinePrompt, ProviderError, ProviderResult};
use crate::config::LlmTierConfig;
use crate::store::TtsMode;
use crate::utils::is_generic_artist;

/// Substitutes `{placeholder}` markers in a template.
#[must_use]
pub fn render_template(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// A line generator backed by an OpenAI-compatible chat-completions endpoint.
///
/// Hosted and local model tiers are both instances of this type; only the
/// URL, model name, and timeouts differ.
pub struct HttpLine {
    name: String,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: std::time::Duration,
    retries: u32,
    rate_limit_delay: std::time::Duration,
    client: reqwest::Client,
}

impl HttpLine {
    /// Builds a tier from configuration; the API key is read from the
    /// configured environment variable so secrets stay out of config files.
    pub fn from_config(config: &LlmTierConfig, client: reqwest::Client) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            timeout: std::time::Duration::from_secs(config.timeout_secs),
            retries: config.retries,
            rate_limit_delay: std::time::Duration::from_millis(config.rate_limit_delay_ms),
            client,
        }
    }

    async fn call_once(&self, prompt: &LinePrompt) -> ProviderResult<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt.prompt }
            ],
            "max_tokens": 120,
            "temperature": 0.9,
        });

        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Upstream(e.to_string())
            }
        })?;

        if response.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Upstream(format!(
                "status {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(format!("bad json: {}", e)))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .or_else(|| payload["choices"][0]["text"].as_str())
            .ok_or_else(|| ProviderError::Upstream("no completion in response".into()))?;
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl LineGenerator for HttpLine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &LinePrompt) -> ProviderResult<String> {
        let mut last = ProviderError::Upstream("no attempt made".into());
        for attempt in 0..=self.retries {
            match self.call_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(ProviderError::RateLimited) => {
                    log::info!(
                        "[Providers] {} rate limited (attempt {}/{})",
                        self.name,
                        attempt + 1,
                        self.retries + 1
                    );
                    if !self.rate_limit_delay.is_zero() {
                        tokio::time::sleep(self.rate_limit_delay).await;
                    }
                    last = ProviderError::RateLimited;
                }
                Err(e) => {
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// The terminal line tier: human-sounding templates, never fails.
///
/// Templates carry `{title}`/`{artist}` placeholders and are written so the
/// result satisfies every text gate by construction: bounded length, no
/// machine vocabulary, artist always present when one exists.
pub struct TemplateLine {
    with_artist: Vec<&'static str>,
    title_only: Vec<&'static str>,
    outro_with_artist: Vec<&'static str>,
    outro_title_only: Vec<&'static str>,
}

impl TemplateLine {
    /// Creates the template tier with its built-in line sets.
    pub fn new() -> Self {
        Self {
            with_artist: vec![
                "Up next, it's {artist} with {title}.",
                "Here comes {artist}. This one's called {title}.",
                "Keeping it rolling with {title} by {artist}.",
                "And now, {artist}. This is {title}.",
                "Stay right there, {artist} is up with {title}.",
            ],
            title_only: vec![
                "Up next: {title}.",
                "This one's called {title}. Stay with us.",
                "Keeping things moving with {title}.",
            ],
            outro_with_artist: vec![
                "That was {artist} with {title}.",
                "You just heard {title} by {artist}.",
            ],
            outro_title_only: vec![
                "That was {title}. More on the way.",
                "You just heard {title}.",
            ],
        }
    }
}

impl Default for TemplateLine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineGenerator for TemplateLine {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, prompt: &LinePrompt) -> ProviderResult<String> {
        let generic = is_generic_artist(&prompt.artist);
        let set = match (prompt.mode, generic) {
            (TtsMode::Outro, false) => &self.outro_with_artist,
            (TtsMode::Outro, true) => &self.outro_title_only,
            (_, false) => &self.with_artist,
            (_, true) => &self.title_only,
        };
        let template = set[fastrand::usize(..set.len())];
        Ok(render_template(
            template,
            &[("title", &prompt.title), ("artist", &prompt.artist)],
        ))
    }
}
