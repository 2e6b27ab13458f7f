//! Google Gemini `generateContent` client.
//!
//! The API key travels as the `key` query parameter; there is no system
//! role, so the instruction carries the persona itself.

use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::{GenerationRequest, ProviderClient, ProviderFuture, send};
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::CurationError;

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    url: Url,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Result<Self, CurationError> {
        let endpoint = config.endpoint_url();
        let mut url = Url::parse(&endpoint).map_err(|e| {
            CurationError::Configuration(format!("invalid Gemini endpoint '{endpoint}': {e}"))
        })?;
        url.query_pairs_mut().append_pair("key", &config.api_key);
        Ok(Self {
            http,
            model: config.model.clone(),
            url,
        })
    }
}

impl ProviderClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            let body = GenerateContentRequest {
                contents: vec![Content {
                    parts: vec![Part {
                        text: &request.prompt,
                    }],
                }],
                generation_config: GenerationConfig {
                    temperature: request.temperature,
                    max_output_tokens: request.max_output_tokens,
                },
            };
            debug!(
                "gemini request: model={}, prompt={} chars, max_tokens={}, temp={}",
                self.model,
                request.prompt.chars().count(),
                request.max_output_tokens,
                request.temperature
            );
            send(
                ProviderKind::Gemini,
                self.http.post(self.url.clone()).json(&body),
            )
            .await
        })
    }
}
