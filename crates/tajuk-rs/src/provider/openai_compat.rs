//! OpenAI-compatible chat-completions client, used for Groq and OpenRouter.

use serde::Serialize;
use tracing::debug;

use super::{GenerationRequest, ProviderClient, ProviderFuture, send};
use crate::config::{CuratorConfig, ProviderConfig, ProviderKind};

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Bearer-authenticated chat client. OpenRouter additionally gets the
/// `HTTP-Referer` and `X-Title` identification headers.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    provider: ProviderKind,
    api_key: String,
    model: String,
    url: String,
    /// `(referer, title)` when vendor headers are enabled.
    vendor: Option<(String, String)>,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig, curator: &CuratorConfig) -> Self {
        Self {
            http,
            provider: config.provider,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            url: config.endpoint_url(),
            vendor: config
                .vendor_headers
                .then(|| (curator.referer.clone(), curator.title.clone())),
        }
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        }
    }
}

impl ProviderClient for OpenAiCompatClient {
    fn kind(&self) -> ProviderKind {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            debug!(
                "{} request: model={}, prompt={} chars, max_tokens={}, temp={}",
                self.provider,
                self.model,
                request.prompt.chars().count(),
                request.max_output_tokens,
                request.temperature
            );

            let mut builder = self
                .http
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key));
            if let Some((ref referer, ref title)) = self.vendor {
                builder = builder.header("HTTP-Referer", referer).header("X-Title", title);
            }

            send(self.provider, builder.json(&self.body(request))).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_has_system_and_user_messages() {
        let config = ProviderConfig::new(ProviderKind::Groq, "gsk");
        let client = OpenAiCompatClient::new(reqwest::Client::new(), &config, &CuratorConfig::default());
        let request = GenerationRequest {
            system: "persona".into(),
            prompt: "tulis".into(),
            temperature: 0.7,
            max_output_tokens: 2048,
        };
        let json = serde_json::to_value(client.body(&request)).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "tulis");
        assert_eq!(json["max_tokens"], 2048);
    }

    #[test]
    fn vendor_headers_only_when_enabled() {
        let curator = CuratorConfig::default().with_vendor_identity("https://example.org", "Tajuk");
        let groq = OpenAiCompatClient::new(
            reqwest::Client::new(),
            &ProviderConfig::new(ProviderKind::Groq, "k"),
            &curator,
        );
        assert!(groq.vendor.is_none());

        let openrouter = OpenAiCompatClient::new(
            reqwest::Client::new(),
            &ProviderConfig::new(ProviderKind::OpenRouter, "k"),
            &curator,
        );
        assert_eq!(
            openrouter.vendor,
            Some(("https://example.org".to_string(), "Tajuk".to_string()))
        );
        assert_eq!(openrouter.url, crate::OPENROUTER_URL);
    }
}
