//! Automatic retry with exponential backoff, jitter, and rate-limit delays.
//!
//! Retries transient failures (408, 5xx, network timeouts) on an exponential
//! schedule and rate-limit failures (429) on the provider's own `retryDelay`
//! hint, or a fixed long delay when there is none. Never retries 400, 401 or
//! 403. Running out of attempts on a rate limit produces
//! [`CurationError::RateLimited`] so the caller can offer a fallback
//! provider instead of a bare failure.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProviderKind;
use crate::error::{CurationError, ErrorClass, RateLimitSignal};
use crate::events::{CurationEvent, EventHandler};

/// Backoff schedule shared by every provider client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubled on each further one.
    pub base_delay: Duration,
    /// Cap for the exponential schedule (before jitter).
    pub max_delay: Duration,
    /// Wait used after a 429 that carries no usable `retryDelay` hint.
    pub rate_limit_fallback_delay: Duration,
    /// Cap for provider-suggested rate-limit delays.
    pub max_rate_limit_delay: Duration,
    /// Upper bound of the random jitter added to standard backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            rate_limit_fallback_delay: Duration::from_secs(30),
            max_rate_limit_delay: Duration::from_secs(120),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Provider defaults: Gemini 5 attempts, Groq 3, OpenRouter 4.
    pub fn for_provider(provider: ProviderKind) -> Self {
        let max_retries = match provider {
            ProviderKind::Gemini => 5,
            ProviderKind::Groq => 3,
            ProviderKind::OpenRouter => 4,
        };
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Policy with the given attempt budget and default delays.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries.max(1),
            ..Default::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Exponential delay after failed attempt `attempt` (1-based), without
    /// jitter: `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff delay plus uniform jitter in `0..=max_jitter`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=jitter_ms))
        };
        self.backoff_delay(attempt) + jitter
    }

    /// Delay before retrying after a 429. A positive provider hint wins
    /// (capped); otherwise the fixed fallback delay applies.
    pub fn rate_limit_delay(&self, hint_ms: Option<u64>) -> Duration {
        match hint_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms).min(self.max_rate_limit_delay),
            _ => self.rate_limit_fallback_delay.min(self.max_rate_limit_delay),
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

// ── Classification ─────────────────────────────────────────────────

/// Classify a non-success HTTP status.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimit,
        408 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Parse a decimal-seconds duration such as `"46.799s"` into milliseconds.
///
/// Returns 0 for empty or unparsable input. The trailing `s` is optional so
/// that `Retry-After: 30` headers parse too.
pub fn parse_retry_delay(raw: &str) -> u64 {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    match number.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => (secs * 1000.0).round() as u64,
        _ => 0,
    }
}

/// Find a `RetryInfo` entry in `error.details[]` and parse its `retryDelay`.
pub fn retry_delay_from_body(body: &Value) -> Option<u64> {
    body.get("error")?
        .get("details")?
        .as_array()?
        .iter()
        .filter(|detail| {
            detail
                .get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.contains("RetryInfo"))
        })
        .find_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .map(parse_retry_delay)
        .filter(|ms| *ms > 0)
}

/// Pull a readable message out of an error body: `error.message`, a string
/// `error`, or the raw text truncated.
pub fn error_message_from_body(text: &str) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        let error = body.get("error");
        if let Some(msg) = error.and_then(|e| e.get("message")).and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Some(msg) = error.and_then(Value::as_str) {
            return msg.to_string();
        }
    }
    let preview: String = text.chars().take(300).collect();
    if preview.is_empty() {
        "(empty body)".to_string()
    } else {
        preview
    }
}

/// Build the classified error for a non-success response.
///
/// `retry_after` is the raw `Retry-After` header, consulted when the body
/// carries no `RetryInfo` hint.
pub fn error_from_status(
    provider: ProviderKind,
    status: u16,
    body_text: &str,
    retry_after: Option<&str>,
) -> CurationError {
    let message = error_message_from_body(body_text);
    match classify_status(status) {
        ErrorClass::RateLimit => {
            let from_body = serde_json::from_str::<Value>(body_text)
                .ok()
                .and_then(|body| retry_delay_from_body(&body));
            let retry_delay_ms = from_body.or_else(|| {
                retry_after
                    .map(parse_retry_delay)
                    .filter(|ms| *ms > 0)
            });
            CurationError::RateLimit {
                provider,
                retry_delay_ms,
                message,
            }
        }
        ErrorClass::Transient => CurationError::Transient {
            provider,
            status: Some(status),
            message,
        },
        ErrorClass::Fatal => CurationError::Permanent {
            provider,
            status,
            message,
        },
    }
}

/// Classify a transport-level failure (no HTTP status available).
pub fn error_from_transport(provider: ProviderKind, err: &reqwest::Error) -> CurationError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    CurationError::Transient {
        provider,
        status: err.status().map(|s| s.as_u16()),
        message: format!("{kind}: {err}"),
    }
}

// ── Retry loop ─────────────────────────────────────────────────────

/// Run `call` until it succeeds, fails fatally, or the policy's attempt
/// budget is spent.
///
/// `call` receives the 1-based attempt number. Returns the value together
/// with the number of attempts used. Attempts run strictly one after the
/// other; both in-flight calls and backoff sleeps stop as soon as `cancel`
/// fires.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: ProviderKind,
    cancel: &CancellationToken,
    events: &dyn EventHandler,
    mut call: F,
) -> Result<(T, u32), CurationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CurationError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(CurationError::Cancelled);
        }
        events.on_event(&CurationEvent::AttemptStarted {
            provider,
            attempt,
            max_attempts,
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CurationError::Cancelled),
            outcome = call(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => e,
        };

        let delay = match err.class() {
            ErrorClass::Fatal => {
                debug!("{provider}: fatal error on attempt {attempt}: {err}");
                return Err(err);
            }
            ErrorClass::RateLimit => {
                let delay = policy.rate_limit_delay(err.retry_delay_ms());
                if attempt >= max_attempts {
                    let signal = RateLimitSignal::new(
                        provider,
                        delay.as_millis() as u64,
                        attempt,
                        policy.max_rate_limit_delay.as_millis() as u64,
                    );
                    warn!(
                        "{provider}: still rate limited after {attempt} attempt(s); suggested wait {:?}",
                        signal.retry_delay()
                    );
                    events.on_event(&CurationEvent::RateLimitExhausted { signal: &signal });
                    return Err(CurationError::RateLimited {
                        signal,
                        fallback: None,
                    });
                }
                delay
            }
            ErrorClass::Transient => {
                if attempt >= max_attempts {
                    warn!("{provider}: giving up after {attempt} attempt(s): {err}");
                    return Err(err);
                }
                policy.delay_for_attempt(attempt)
            }
        };

        warn!(
            "{provider}: attempt {attempt}/{max_attempts} failed: {err}. Retrying in {delay:?}..."
        );
        events.on_event(&CurationEvent::RetryScheduled {
            provider,
            attempt,
            delay,
            error: &err,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CurationError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
