//! HTTP clients for the supported LLM providers.
//!
//! Both wire protocols sit behind [`ProviderClient`]. A client performs
//! exactly one HTTP request per [`generate`](ProviderClient::generate) call
//! and classifies failures into [`CurationError`] variants; retrying is the
//! job of [`run_with_retry`](crate::api::retry::run_with_retry).

pub mod gemini;
pub mod openai_compat;

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, trace};

use crate::api::retry::{error_from_status, error_from_transport};
use crate::api::usage::TokenUsage;
use crate::config::{CuratorConfig, ProviderConfig, ProviderKind};
use crate::error::CurationError;
use crate::response::{extract_usage, parse_body};

pub use gemini::GeminiClient;
pub use openai_compat::OpenAiCompatClient;

/// System message sent to chat-style providers.
pub const SYSTEM_PERSONA: &str = "You are a football news editor who writes in Bahasa Melayu. \
                                  Follow the instructions exactly and output only the post.";

/// Boxed future returned by [`ProviderClient::generate`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawProviderResponse, CurationError>> + Send + 'a>>;

/// What to send for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, config: &CuratorConfig) -> Self {
        Self {
            system: SYSTEM_PERSONA.to_string(),
            prompt: prompt.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// A successful (2xx) response body, decoded but not yet interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProviderResponse {
    pub status: u16,
    pub body: Value,
    pub usage: Option<TokenUsage>,
}

/// One provider backend.
///
/// Uses a boxed future so that the trait is dyn-compatible.
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Send one request. Non-2xx statuses and transport failures come back
    /// as classified errors; a 2xx body that is not JSON is a parse error.
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a>;
}

/// Build the HTTP client shared by every provider.
pub fn build_http_client(config: &CuratorConfig) -> Result<reqwest::Client, CurationError> {
    reqwest::Client::builder()
        .user_agent(concat!("tajuk-rs/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| CurationError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Pick the client implementation for `config.provider`.
///
/// Fails with a configuration error before any network traffic when the
/// key, model or endpoint is unusable.
pub fn client_for(
    config: &ProviderConfig,
    curator: &CuratorConfig,
    http: reqwest::Client,
) -> Result<Box<dyn ProviderClient>, CurationError> {
    config.validate()?;
    if config.is_openai_compatible() {
        Ok(Box::new(OpenAiCompatClient::new(http, config, curator)))
    } else {
        Ok(Box::new(GeminiClient::new(http, config)?))
    }
}

/// Send a prepared request and classify the outcome.
pub(crate) async fn send(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<RawProviderResponse, CurationError> {
    let start = Instant::now();

    let resp = request
        .send()
        .await
        .map_err(|e| error_from_transport(provider, &e))?;

    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = resp
        .text()
        .await
        .map_err(|e| error_from_transport(provider, &e))?;

    debug!(
        "{provider} response: HTTP {} in {:.1}s ({} bytes)",
        status,
        start.elapsed().as_secs_f64(),
        text.len()
    );

    if !status.is_success() {
        trace!("{provider} error body: {text}");
        return Err(error_from_status(
            provider,
            status.as_u16(),
            &text,
            retry_after.as_deref(),
        ));
    }

    let body = parse_body(&text)?;
    let usage = extract_usage(&body);
    Ok(RawProviderResponse {
        status: status.as_u16(),
        body,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_for_rejects_missing_key() {
        let http = reqwest::Client::new();
        let config = ProviderConfig::new(ProviderKind::Gemini, "");
        let err = client_for(&config, &CuratorConfig::default(), http).err().unwrap();
        assert!(matches!(err, CurationError::Configuration(_)));
    }

    #[test]
    fn client_for_picks_protocol() {
        let http = reqwest::Client::new();
        let curator = CuratorConfig::default();
        for kind in ProviderKind::ALL {
            let config = ProviderConfig::new(kind, "k");
            let client = client_for(&config, &curator, http.clone()).unwrap();
            assert_eq!(client.kind(), kind);
            assert_eq!(client.model(), kind.default_model());
        }
    }

    #[test]
    fn generation_request_uses_curator_settings() {
        let curator = CuratorConfig::default().with_temperature(0.2).with_max_output_tokens(512);
        let req = GenerationRequest::new("hi", &curator);
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.max_output_tokens, 512);
        assert_eq!(req.system, SYSTEM_PERSONA);
    }
}
