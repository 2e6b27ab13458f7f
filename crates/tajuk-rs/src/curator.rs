//! The pipeline entry point.
//!
//! [`Curator`] validates input and credentials, builds the prompt, runs the
//! provider call through the retry loop, and turns the response into a
//! cleaned [`CurationResult`]. It never switches providers on its own: a
//! rate-limit exhaustion comes back as [`CurationError::RateLimited`] with
//! the advisor's suggestion attached. The `*_with_fallback` methods apply
//! the usual policy (switch once if the candidate is usable).

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::api::retry::run_with_retry;
use crate::api::usage::{TokenUsage, UsageRecord, UsageTracker, generate_trace_id};
use crate::config::{CuratorConfig, ProviderConfig, ProviderKind, ProviderSettings};
use crate::error::CurationError;
use crate::events::{CurationEvent, EventHandler, NoopHandler};
use crate::fallback::{FallbackAdvisor, FallbackDecision};
use crate::prompt::PromptBuilder;
use crate::provider::{GenerationRequest, ProviderClient, build_http_client, client_for};
use crate::response::{DEGRADED_PLACEHOLDER, cleanup, extract_text, split_title_body_source};
use crate::{CurationRequest, CurationResult, Operation, Refinement};

/// A unit of work the curator can run against any provider.
#[derive(Debug, Clone, Copy)]
enum Job<'r> {
    Curate(&'r CurationRequest),
    Refine {
        post: &'r str,
        refinements: &'r [Refinement],
    },
}

impl Job<'_> {
    fn operation(&self) -> Operation {
        match self {
            Job::Curate(_) => Operation::Curate,
            Job::Refine { .. } => Operation::Refine,
        }
    }

    fn validate(&self) -> Result<(), CurationError> {
        match self {
            Job::Curate(request) => request.validate(),
            Job::Refine { post, .. } if post.trim().is_empty() => {
                Err(CurationError::Input("post to refine is empty".into()))
            }
            Job::Refine { .. } => Ok(()),
        }
    }
}

/// Runs curation and refinement calls.
///
/// Holds one HTTP client for all providers. Usage counters accumulate across
/// calls; the lock is held only while recording.
pub struct Curator<'a> {
    http: reqwest::Client,
    config: CuratorConfig,
    settings: ProviderSettings,
    prompts: PromptBuilder,
    event_handler: &'a dyn EventHandler,
    usage: Mutex<UsageTracker>,
}

impl<'a> Curator<'a> {
    pub fn new(config: CuratorConfig) -> Result<Self, CurationError> {
        let http = build_http_client(&config)?;
        Ok(Self {
            http,
            prompts: PromptBuilder::with_heuristic(config.technical.clone()),
            config,
            settings: ProviderSettings::new(),
            event_handler: &NoopHandler,
            usage: Mutex::new(UsageTracker::new()),
        })
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Provider configurations consulted for fallback suggestions.
    pub fn with_settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    // ── Curate ─────────────────────────────────────────────────────

    /// Turn raw text into a post using `provider`.
    pub async fn curate(
        &self,
        request: &CurationRequest,
        provider: &ProviderConfig,
    ) -> Result<CurationResult, CurationError> {
        self.curate_cancellable(request, provider, &CancellationToken::new())
            .await
    }

    pub async fn curate_cancellable(
        &self,
        request: &CurationRequest,
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        self.run(Job::Curate(request), provider, cancel).await
    }

    /// Curate with a caller-supplied client.
    pub async fn curate_with(
        &self,
        client: &dyn ProviderClient,
        request: &CurationRequest,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        let job = Job::Curate(request);
        job.validate()?;
        self.execute(client, job, cancel).await
    }

    /// Like [`curate_cancellable`](Self::curate_cancellable), but on
    /// rate-limit exhaustion retries once on the suggested provider when it
    /// has a key.
    pub async fn curate_with_fallback(
        &self,
        request: &CurationRequest,
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        self.run_with_fallback(Job::Curate(request), provider, cancel)
            .await
    }

    // ── Refine ─────────────────────────────────────────────────────

    /// Apply `refinements` to an existing post in one call.
    ///
    /// The `Sumber:` line is kept if the post has one.
    pub async fn refine(
        &self,
        post: &str,
        refinements: &[Refinement],
        provider: &ProviderConfig,
    ) -> Result<CurationResult, CurationError> {
        self.refine_cancellable(post, refinements, provider, &CancellationToken::new())
            .await
    }

    pub async fn refine_cancellable(
        &self,
        post: &str,
        refinements: &[Refinement],
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        self.run(Job::Refine { post, refinements }, provider, cancel)
            .await
    }

    /// Refine with a caller-supplied client.
    pub async fn refine_with(
        &self,
        client: &dyn ProviderClient,
        post: &str,
        refinements: &[Refinement],
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        let job = Job::Refine { post, refinements };
        job.validate()?;
        self.execute(client, job, cancel).await
    }

    pub async fn refine_with_fallback(
        &self,
        post: &str,
        refinements: &[Refinement],
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        self.run_with_fallback(Job::Refine { post, refinements }, provider, cancel)
            .await
    }

    // ── Usage ──────────────────────────────────────────────────────

    /// Usage of the most recent completed call.
    pub fn last_usage(&self) -> Option<TokenUsage> {
        self.last_record().map(|r| r.usage)
    }

    pub fn last_record(&self) -> Option<UsageRecord> {
        self.usage.lock().ok().and_then(|u| u.last().cloned())
    }

    pub fn usage_summary(&self) -> String {
        self.usage
            .lock()
            .map(|u| u.summary())
            .unwrap_or_else(|_| "usage unavailable".to_string())
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn run(
        &self,
        job: Job<'_>,
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        provider.validate()?;
        job.validate()?;
        let client = client_for(provider, &self.config, self.http.clone())?;
        self.execute(client.as_ref(), job, cancel).await
    }

    async fn run_with_fallback(
        &self,
        job: Job<'_>,
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        match self.run(job, provider, cancel).await {
            Err(CurationError::RateLimited { signal, fallback }) => {
                match FallbackAdvisor::new(&self.settings).decide(&signal) {
                    FallbackDecision::SwitchTo(next) => {
                        info!("{} exhausted; switching to {next}", signal.provider);
                        let next_config = self.settings.require(next)?;
                        self.run(job, next_config, cancel).await
                    }
                    FallbackDecision::Wait(_) => Err(CurationError::RateLimited { signal, fallback }),
                }
            }
            other => other,
        }
    }

    async fn execute(
        &self,
        client: &dyn ProviderClient,
        job: Job<'_>,
        cancel: &CancellationToken,
    ) -> Result<CurationResult, CurationError> {
        let kind = client.kind();
        let operation = job.operation();
        let trace_id = generate_trace_id();

        let prompt = match job {
            Job::Curate(request) => self.prompts.build_for_request(request),
            Job::Refine { post, refinements } => {
                let include_source = split_title_body_source(post).source_citation.is_some();
                self.prompts
                    .build_refinement_prompt(post, refinements, include_source)
            }
        };

        let span = match operation {
            Operation::Curate => {
                info_span!("curate", %trace_id, provider = %kind, model = client.model())
            }
            Operation::Refine => {
                info_span!("refine", %trace_id, provider = %kind, model = client.model())
            }
        };
        async {
            self.event_handler.on_event(&CurationEvent::CallStarted {
                trace_id: &trace_id,
                operation,
                provider: kind,
                prompt_chars: prompt.chars().count(),
            });

            let request = GenerationRequest::new(prompt, &self.config);
            let policy = self.config.retry_policy_for(kind);
            let mut last_attempt = 0;

            let outcome = run_with_retry(&policy, kind, cancel, self.event_handler, |attempt| {
                last_attempt = attempt;
                client.generate(&request)
            })
            .await;

            let (text, usage, attempts, degraded) = match outcome {
                Ok((raw, attempts)) => {
                    let usage = raw.usage.unwrap_or_default();
                    if let Some(ref reported) = raw.usage {
                        self.event_handler.on_event(&CurationEvent::TokenUsage {
                            provider: kind,
                            usage: reported,
                        });
                    }
                    match extract_text(&raw.body) {
                        Ok(text) => (cleanup(&text), usage, attempts, false),
                        Err(e) => {
                            self.degrade(kind, &e.to_string());
                            (DEGRADED_PLACEHOLDER.to_string(), usage, attempts, true)
                        }
                    }
                }
                Err(CurationError::Parse(reason)) => {
                    self.degrade(kind, &reason);
                    let attempts = last_attempt.max(1);
                    (DEGRADED_PLACEHOLDER.to_string(), TokenUsage::default(), attempts, true)
                }
                Err(CurationError::RateLimited { signal, .. }) => {
                    let suggestion = FallbackAdvisor::new(&self.settings).suggest_fallback(kind);
                    self.event_handler
                        .on_event(&CurationEvent::FallbackSuggested { suggestion: &suggestion });
                    return Err(CurationError::RateLimited {
                        signal,
                        fallback: Some(suggestion),
                    });
                }
                Err(e) => return Err(e),
            };

            if let Ok(mut tracker) = self.usage.lock() {
                tracker.record(kind, operation, usage, &trace_id);
            }

            self.event_handler.on_event(&CurationEvent::Completed {
                trace_id: &trace_id,
                provider: kind,
                attempts,
                chars: text.chars().count(),
            });

            Ok(CurationResult {
                text,
                usage,
                provider: kind,
                attempts,
                trace_id: trace_id.clone(),
                degraded,
            })
        }
        .instrument(span)
        .await
    }

    fn degrade(&self, provider: ProviderKind, reason: &str) {
        warn!("{provider}: unreadable response ({reason}); returning placeholder");
        self.event_handler
            .on_event(&CurationEvent::Degraded { provider, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tone;
    use crate::api::retry::RetryPolicy;
    use crate::events::FnEventHandler;
    use crate::provider::{ProviderFuture, RawProviderResponse};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted outcomes, one per call.
    struct ScriptedClient {
        kind: ProviderKind,
        script: Mutex<VecDeque<Result<Value, CurationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(kind: ProviderKind, script: Vec<Result<Value, CurationError>>) -> Self {
            Self {
                kind,
                script: Mutex::new(script.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProviderClient for ScriptedClient {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn generate<'a>(&'a self, request: &'a GenerationRequest) -> ProviderFuture<'a> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Box::pin(async move {
                next.map(|body| RawProviderResponse {
                    status: 200,
                    usage: crate::response::extract_usage(&body),
                    body,
                })
            })
        }
    }

    fn gemini_body(text: &str) -> Value {
        json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}],
            "usageMetadata": {"promptTokenCount": 100, "candidatesTokenCount": 40, "totalTokenCount": 140}
        })
    }

    fn fast_config() -> CuratorConfig {
        CuratorConfig::default().with_retry_policy_for_all(
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                rate_limit_fallback_delay: Duration::from_millis(50),
                max_rate_limit_delay: Duration::from_millis(200),
                max_jitter: Duration::ZERO,
            },
        )
    }

    fn rate_limit() -> CurationError {
        CurationError::RateLimit {
            provider: ProviderKind::Gemini,
            retry_delay_ms: Some(100),
            message: "quota".into(),
        }
    }

    const TITLE: &str = "Arsenal Menang Derbi London";
    const BODY: &str = "Arsenal menewaskan Chelsea 2-1 di Emirates malam tadi dengan gol lewat Saka.";
    const POST: &str = "Arsenal Menang Derbi London\n\nArsenal menewaskan Chelsea 2-1 di Emirates \
                        malam tadi dengan gol lewat Saka.";

    #[tokio::test]
    async fn curate_cleans_text_and_records_usage() {
        let client = ScriptedClient::new(
            ProviderKind::Gemini,
            vec![Ok(gemini_body(&format!("**{TITLE}**\n\n\n\n{BODY}")))],
        );
        let curator = Curator::new(fast_config()).unwrap();
        let request = CurationRequest::new("Arsenal beat Chelsea 2-1.", Tone::Formal);

        let result = curator
            .curate_with(&client, &request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.text, POST);
        assert_eq!(result.attempts, 1);
        assert!(!result.degraded);
        assert_eq!(result.usage.total_tokens, 140);
        assert_eq!(curator.last_usage().unwrap().total_tokens, 140);
        assert_eq!(result.post().title.as_deref(), Some(TITLE));
        assert!(curator.usage_summary().contains("gemini: 1 call(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success() {
        let transient = || CurationError::Transient {
            provider: ProviderKind::Gemini,
            status: Some(503),
            message: "overloaded".into(),
        };
        let client = ScriptedClient::new(
            ProviderKind::Gemini,
            vec![Err(transient()), Err(transient()), Ok(gemini_body(POST))],
        );
        let curator = Curator::new(fast_config()).unwrap();
        let request = CurationRequest::new("text", Tone::Casual);

        let start = tokio::time::Instant::now();
        let result = curator
            .curate_with(&client, &request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert!(start.elapsed() >= Duration::from_millis(10 + 20));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_carries_suggestion() {
        let client = ScriptedClient::new(
            ProviderKind::Gemini,
            vec![Err(rate_limit()), Err(rate_limit()), Err(rate_limit())],
        );
        let settings = ProviderSettings::new()
            .with(ProviderConfig::new(ProviderKind::Gemini, "g"))
            .with(ProviderConfig::new(ProviderKind::Groq, "q"));
        let suggested = AtomicU32::new(0);
        let handler = FnEventHandler::new(|event| {
            if let CurationEvent::FallbackSuggested { .. } = event {
                suggested.fetch_add(1, Ordering::SeqCst);
            }
        });
        let curator = Curator::new(fast_config())
            .unwrap()
            .with_settings(settings)
            .with_event_handler(&handler);

        let err = curator
            .curate_with(&client, &CurationRequest::new("text", Tone::Formal), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CurationError::RateLimited { signal, fallback } => {
                assert_eq!(signal.provider, ProviderKind::Gemini);
                assert_eq!(signal.attempt, 3);
                assert_eq!(signal.retry_delay_ms, 100);
                let fallback = fallback.unwrap();
                assert_eq!(fallback.candidate, ProviderKind::Groq);
                assert!(fallback.usable);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(suggested.load(Ordering::SeqCst), 1);
        assert!(curator.last_usage().is_none());
    }

    #[tokio::test]
    async fn unreadable_response_degrades() {
        let client = ScriptedClient::new(
            ProviderKind::Groq,
            vec![Ok(json!({"choices": [{"finish_reason": "length"}]}))],
        );
        let curator = Curator::new(fast_config()).unwrap();
        let result = curator
            .curate_with(&client, &CurationRequest::new("text", Tone::Formal), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.degraded);
        assert_eq!(result.text, DEGRADED_PLACEHOLDER);
        assert_eq!(result.provider, ProviderKind::Groq);
    }

    #[tokio::test]
    async fn non_json_body_degrades_with_attempt_count() {
        let client = ScriptedClient::new(
            ProviderKind::Gemini,
            vec![Err(CurationError::Parse("not json".into()))],
        );
        let curator = Curator::new(fast_config()).unwrap();
        let result = curator
            .curate_with(&client, &CurationRequest::new("text", Tone::Formal), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.degraded);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn empty_input_rejected_before_any_call() {
        let client = ScriptedClient::new(ProviderKind::Gemini, vec![]);
        let curator = Curator::new(fast_config()).unwrap();
        let err = curator
            .curate_with(&client, &CurationRequest::new("  ", Tone::Formal), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::Input(_)));
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_key_rejected_before_any_call() {
        let curator = Curator::new(fast_config()).unwrap();
        let err = curator
            .curate(
                &CurationRequest::new("text", Tone::Formal),
                &ProviderConfig::new(ProviderKind::Groq, ""),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::Configuration(_)));
    }

    #[tokio::test]
    async fn refine_keeps_source_rule_when_post_has_citation() {
        let client = ScriptedClient::new(ProviderKind::Gemini, vec![Ok(gemini_body(POST))]);
        let curator = Curator::new(fast_config()).unwrap();
        let post = format!("{POST}\n\nSumber: ESPN");

        let result = curator
            .refine_with(
                &client,
                &post,
                &[Refinement::RecheckFlow, Refinement::RemoveHashtags],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("Keep the `Sumber:` line"));
        assert!(prompts[0].contains("1. Check the flow"));
        assert!(prompts[0].contains("2. Remove every hashtag."));
        assert_eq!(result.text, POST);
        assert_eq!(curator.last_record().unwrap().operation, Operation::Refine);
    }

    #[tokio::test]
    async fn refine_rejects_empty_post() {
        let client = ScriptedClient::new(ProviderKind::Gemini, vec![]);
        let curator = Curator::new(fast_config()).unwrap();
        let err = curator
            .refine_with(&client, "\n", &[Refinement::Rephrase], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::Input(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_call() {
        let client = ScriptedClient::new(ProviderKind::Gemini, vec![]);
        let curator = Curator::new(fast_config()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = curator
            .curate_with(&client, &CurationRequest::new("text", Tone::Formal), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CurationError::Cancelled));
    }
}
