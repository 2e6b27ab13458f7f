//! End-to-end tests for the curator against mock provider servers.
//!
//! Retry delays are shrunk to milliseconds and jitter is off so the tests
//! exercise the real backoff loop quickly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tajuk_rs::prelude::*;
use tajuk_rs::response::DEGRADED_PLACEHOLDER;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";
const GROQ_PATH: &str = "/openai/v1/chat/completions";

const GENERATED: &str = "Arsenal Tundukkan Chelsea\n\nArsenal menewaskan Chelsea 2-1 di Emirates \
                         malam tadi menerusi gol lewat Bukayo Saka.\n\nSumber: ESPN";

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries: attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        rate_limit_fallback_delay: Duration::from_millis(20),
        max_rate_limit_delay: Duration::from_millis(50),
        max_jitter: Duration::ZERO,
    }
}

fn gemini_success(text: &str) -> Value {
    json!({
        "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}],
        "usageMetadata": {"promptTokenCount": 320, "candidatesTokenCount": 60, "totalTokenCount": 380}
    })
}

fn gemini_quota_error() -> Value {
    json!({
        "error": {
            "code": 429,
            "message": "Quota exceeded",
            "status": "RESOURCE_EXHAUSTED",
            "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "0.03s"}]
        }
    })
}

fn settings_for(server: &MockServer, groq_key: &str) -> ProviderSettings {
    ProviderSettings::new()
        .with(
            ProviderConfig::new(ProviderKind::Gemini, "g-key")
                .with_endpoint(format!("{}{GEMINI_PATH}", server.uri())),
        )
        .with(
            ProviderConfig::new(ProviderKind::Groq, groq_key)
                .with_endpoint(format!("{}{GROQ_PATH}", server.uri())),
        )
}

fn request() -> CurationRequest {
    CurationRequest::new(
        "Arsenal beat Chelsea 2-1 at the Emirates thanks to a late Saka goal.",
        Tone::Formal,
    )
    .with_source_citation(true)
}

// ── Success and retries ──────────────────────────────────────────────

#[tokio::test]
async fn curate_splits_generated_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_success(GENERATED)))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(3)))
        .unwrap()
        .with_settings(settings);

    let result = curator.curate(&request(), &config).await.unwrap();
    let post = result.post();

    assert_eq!(post.title.as_deref(), Some("Arsenal Tundukkan Chelsea"));
    assert!(post.body.starts_with("Arsenal menewaskan Chelsea 2-1"));
    assert_eq!(post.source_citation.as_deref(), Some("Sumber: ESPN"));
    assert_eq!(result.usage.total_tokens, 380);
    assert_eq!(curator.last_usage().unwrap().prompt_tokens, 320);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_success(GENERATED)))
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let retries = AtomicU32::new(0);
    let handler = FnEventHandler::new(|event| {
        if let CurationEvent::RetryScheduled { .. } = event {
            retries.fetch_add(1, Ordering::SeqCst);
        }
    });
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(4)))
        .unwrap()
        .with_event_handler(&handler);

    let start = std::time::Instant::now();
    let result = curator.curate(&request(), &config).await.unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    // 5ms after the first failure, 10ms after the second.
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "API key not valid"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator =
        Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(5))).unwrap();

    let err = curator.curate(&request(), &config).await.unwrap_err();
    assert!(matches!(err, CurationError::Permanent { status: 401, .. }));
    assert!(err.user_message().contains("rejected the API key"));
}

// ── Rate limits and fallback ─────────────────────────────────────────

#[tokio::test]
async fn exhausted_rate_limit_suggests_groq() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(gemini_quota_error()))
        .expect(3)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "gsk_live");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(3)))
        .unwrap()
        .with_settings(settings);

    let err = curator.curate(&request(), &config).await.unwrap_err();
    let signal = err.rate_limit_signal().cloned().unwrap();
    assert_eq!(signal.provider, ProviderKind::Gemini);
    assert_eq!(signal.attempt, 3);
    assert_eq!(signal.retry_delay_ms, 30);

    match err {
        CurationError::RateLimited {
            fallback: Some(suggestion),
            ..
        } => {
            assert_eq!(suggestion.candidate, ProviderKind::Groq);
            assert!(suggestion.usable);
        }
        other => panic!("expected RateLimited with suggestion, got {other:?}"),
    }
}

#[tokio::test]
async fn fallback_candidate_without_key_is_reported_unusable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(gemini_quota_error()))
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(2)))
        .unwrap()
        .with_settings(settings);

    let err = curator
        .curate_with_fallback(&request(), &config, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.user_message().contains("once its API key is configured"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn auto_fallback_switches_to_groq() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(gemini_quota_error()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GROQ_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": GENERATED}}],
            "usage": {"prompt_tokens": 300, "completion_tokens": 70, "total_tokens": 370}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "gsk_live");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(2)))
        .unwrap()
        .with_settings(settings);

    let result = curator
        .curate_with_fallback(&request(), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.provider, ProviderKind::Groq);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.usage.total_tokens, 370);
    assert!(curator.usage_summary().contains("groq: 1 call(s)"));
}

#[tokio::test]
async fn refine_fallback_switches_to_groq() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(gemini_quota_error()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GROQ_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": GENERATED}}],
            "usage": {"prompt_tokens": 210, "completion_tokens": 65, "total_tokens": 275}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "gsk_live");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default().with_retry_policy_for_all(fast_policy(2)))
        .unwrap()
        .with_settings(settings);

    let result = curator
        .refine_with_fallback(
            GENERATED,
            &[Refinement::Rephrase],
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.provider, ProviderKind::Groq);
    assert_eq!(result.usage.total_tokens, 275);
    assert_eq!(curator.last_usage().unwrap().total_tokens, 275);

    let received = server.received_requests().await.unwrap();
    let groq_call = received
        .iter()
        .find(|r| r.url.path() == GROQ_PATH)
        .unwrap();
    let body: Value = groq_call.body_json().unwrap();
    let prompt = body["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("1. Rephrase the post"));
    assert!(prompt.contains("Arsenal Tundukkan Chelsea"));
    assert!(prompt.contains("Keep the `Sumber:` line"));
}

#[tokio::test]
async fn cancellation_aborts_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "slow down"}})))
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let policy = RetryPolicy {
        rate_limit_fallback_delay: Duration::from_secs(30),
        max_rate_limit_delay: Duration::from_secs(60),
        ..fast_policy(5)
    };
    let curator =
        Curator::new(CuratorConfig::default().with_retry_policy_for_all(policy)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = std::time::Instant::now();
    let err = curator
        .curate_cancellable(&request(), &config, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, CurationError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ── Degraded responses ───────────────────────────────────────────────

#[tokio::test]
async fn response_without_text_degrades_to_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        })))
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default()).unwrap();

    let result = curator.curate(&request(), &config).await.unwrap();
    assert!(result.degraded);
    assert_eq!(result.text, DEGRADED_PLACEHOLDER);
    assert_eq!(result.post().title, None);
}

#[tokio::test]
async fn refine_sends_second_call_with_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_success(GENERATED)))
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server, "");
    let config = settings.require(ProviderKind::Gemini).unwrap().clone();
    let curator = Curator::new(CuratorConfig::default()).unwrap();

    let result = curator
        .refine(GENERATED, &[Refinement::ShortenDetailed, Refinement::MakeCasual], &config)
        .await
        .unwrap();
    assert_eq!(result.text, GENERATED);

    let received = server.received_requests().await.unwrap();
    let body: Value = received[0].body_json().unwrap();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("1. Shorten the post"));
    assert!(prompt.contains("2. Switch to a casual register"));
    assert!(prompt.contains("Arsenal Tundukkan Chelsea"));
}
