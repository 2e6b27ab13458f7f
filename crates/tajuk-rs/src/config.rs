//! Provider identities, credentials, and pipeline settings.
//!
//! [`ProviderConfig`] describes one backend (key, model, endpoint);
//! [`ProviderSettings`] holds every backend the process knows about so the
//! fallback advisor can check whether an alternative is usable.
//! [`CuratorConfig`] carries the generation, retry, and prompt settings
//! shared by all calls.
//!
//! Keys come from the environment at call time and are never persisted:
//!
//! | Provider | Key variable | Model override |
//! |----------|--------------|----------------|
//! | Gemini | `GEMINI_API_KEY` | `GEMINI_MODEL` |
//! | Groq | `GROQ_API_KEY` | `GROQ_MODEL` |
//! | OpenRouter | `OPENROUTER_KEY` | `OPENROUTER_MODEL` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::retry::RetryPolicy;
use crate::error::CurationError;
use crate::prompt::TechnicalHeuristic;
use crate::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE, GEMINI_BASE_URL, GROQ_URL, OPENROUTER_URL};

// ── Provider identity ──────────────────────────────────────────────

/// The backends the pipeline can talk to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Gemini, ProviderKind::Groq, ProviderKind::OpenRouter];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    /// Groq and OpenRouter speak the OpenAI chat-completions protocol.
    pub fn is_openai_compatible(self) -> bool {
        !matches!(self, ProviderKind::Gemini)
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenRouter => "meta-llama/llama-3.3-70b-instruct:free",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_KEY",
        }
    }

    pub fn model_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_MODEL",
            ProviderKind::Groq => "GROQ_MODEL",
            ProviderKind::OpenRouter => "OPENROUTER_MODEL",
        }
    }

    /// OpenRouter asks callers to identify themselves with `HTTP-Referer`
    /// and `X-Title`.
    pub fn requires_vendor_headers(self) -> bool {
        matches!(self, ProviderKind::OpenRouter)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "groq" => Ok(ProviderKind::Groq),
            "openrouter" | "open_router" | "open-router" => Ok(ProviderKind::OpenRouter),
            other => Err(CurationError::Configuration(format!(
                "unknown provider '{other}' (expected gemini, groq or openrouter)"
            ))),
        }
    }
}

// ── ProviderConfig ─────────────────────────────────────────────────

/// Credentials and addressing for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    /// Model identifier. For Gemini it is part of the endpoint path.
    pub model: String,
    /// Full URL override. `None` uses the provider's public endpoint.
    pub endpoint: Option<String>,
    /// Send `HTTP-Referer` / `X-Title` with each request.
    pub vendor_headers: bool,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            endpoint: None,
            vendor_headers: provider.requires_vendor_headers(),
        }
    }

    /// Read the key and optional model override from the environment.
    ///
    /// A missing key yields a config with an empty key; it is rejected by
    /// [`validate`](Self::validate) and reported as unusable by the
    /// fallback advisor.
    pub fn from_env(provider: ProviderKind) -> Self {
        let api_key = std::env::var(provider.api_key_env()).unwrap_or_default();
        let mut config = Self::new(provider, api_key.trim());
        if let Ok(model) = std::env::var(provider.model_env())
            && !model.trim().is_empty()
        {
            config.model = model.trim().to_string();
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_vendor_headers(mut self, enabled: bool) -> Self {
        self.vendor_headers = enabled;
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn is_openai_compatible(&self) -> bool {
        self.provider.is_openai_compatible()
    }

    /// URL the client posts to (without the Gemini `key` query parameter).
    pub fn endpoint_url(&self) -> String {
        if let Some(ref endpoint) = self.endpoint {
            return endpoint.clone();
        }
        match self.provider {
            ProviderKind::Gemini => format!("{GEMINI_BASE_URL}/{}:generateContent", self.model),
            ProviderKind::Groq => GROQ_URL.to_string(),
            ProviderKind::OpenRouter => OPENROUTER_URL.to_string(),
        }
    }

    /// Check the invariants that must hold before any network call.
    pub fn validate(&self) -> Result<(), CurationError> {
        if !self.has_api_key() {
            return Err(CurationError::Configuration(format!(
                "no API key for {} (set {})",
                self.provider,
                self.provider.api_key_env()
            )));
        }
        if self.endpoint.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(CurationError::Configuration(format!(
                "empty endpoint override for {}",
                self.provider
            )));
        }
        if self.model.trim().is_empty() {
            return Err(CurationError::Configuration(format!(
                "no model configured for {}",
                self.provider
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.has_api_key() { "<redacted>" } else { "<empty>" };
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &key)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("vendor_headers", &self.vendor_headers)
            .finish()
    }
}

// ── ProviderSettings ───────────────────────────────────────────────

/// Every provider configuration known to the process.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    configs: BTreeMap<ProviderKind, ProviderConfig>,
}

impl ProviderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all three providers from the environment.
    pub fn from_env() -> Self {
        ProviderKind::ALL
            .into_iter()
            .fold(Self::new(), |s, kind| s.with(ProviderConfig::from_env(kind)))
    }

    /// Insert or replace the configuration for its provider.
    pub fn with(mut self, config: ProviderConfig) -> Self {
        self.configs.insert(config.provider, config);
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&ProviderConfig> {
        self.configs.get(&provider)
    }

    pub fn get_mut(&mut self, provider: ProviderKind) -> Option<&mut ProviderConfig> {
        self.configs.get_mut(&provider)
    }

    /// The configuration for `provider`, validated.
    pub fn require(&self, provider: ProviderKind) -> Result<&ProviderConfig, CurationError> {
        let config = self.get(provider).ok_or_else(|| {
            CurationError::Configuration(format!("{provider} is not configured"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// True when the provider has a configuration with a non-empty key.
    pub fn is_usable(&self, provider: ProviderKind) -> bool {
        self.get(provider).is_some_and(ProviderConfig::has_api_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.configs.values()
    }
}

// ── CuratorConfig ──────────────────────────────────────────────────

/// Settings shared by every curation call.
#[derive(Debug, Clone)]
pub struct CuratorConfig {
    /// Sampling temperature. Default: `0.7`.
    pub temperature: f32,
    /// Output token ceiling. Default: `2048`.
    pub max_output_tokens: u32,
    /// Per-provider retry overrides. Providers without an entry use
    /// [`RetryPolicy::for_provider`].
    pub retry: BTreeMap<ProviderKind, RetryPolicy>,
    /// Controls when the tactical-analysis template is chosen.
    pub technical: TechnicalHeuristic,
    /// `HTTP-Referer` value for providers that want vendor headers.
    pub referer: String,
    /// `X-Title` value for providers that want vendor headers.
    pub title: String,
    /// TCP connect timeout. Default: 10s.
    pub connect_timeout: Duration,
    /// Whole-request timeout. Default: 60s.
    pub request_timeout: Duration,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            retry: BTreeMap::new(),
            technical: TechnicalHeuristic::default(),
            referer: "https://github.com/tajuk-rs/tajuk-rs".to_string(),
            title: "tajuk-rs".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl CuratorConfig {
    pub fn retry_policy_for(&self, provider: ProviderKind) -> RetryPolicy {
        self.retry
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| RetryPolicy::for_provider(provider))
    }

    pub fn with_retry_policy(mut self, provider: ProviderKind, policy: RetryPolicy) -> Self {
        self.retry.insert(provider, policy);
        self
    }

    /// Use the same retry policy for every provider.
    pub fn with_retry_policy_for_all(mut self, policy: RetryPolicy) -> Self {
        for kind in ProviderKind::ALL {
            self.retry.insert(kind, policy.clone());
        }
        self
    }

    /// Override the attempt budget for every provider, keeping the rest of
    /// each provider's policy.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        for kind in ProviderKind::ALL {
            let policy = self.retry_policy_for(kind);
            self.retry.insert(kind, RetryPolicy { max_retries: max_retries.max(1), ..policy });
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_technical_heuristic(mut self, heuristic: TechnicalHeuristic) -> Self {
        self.technical = heuristic;
        self
    }

    pub fn with_vendor_identity(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }
}
