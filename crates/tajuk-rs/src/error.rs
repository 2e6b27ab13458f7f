//! Error taxonomy for the curation pipeline.
//!
//! Every failure is a [`CurationError`] variant. The retry loop asks each
//! error for its [`ErrorClass`] to decide between retrying with standard
//! backoff, retrying with a rate-limit delay, or giving up immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderKind;
use crate::fallback::FallbackSuggestion;

/// How the retry loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with exponential backoff.
    Transient,
    /// Retried with the provider-suggested or fixed rate-limit delay.
    RateLimit,
    /// Surfaced immediately.
    Fatal,
}

/// Raised when a provider keeps rejecting calls for quota reasons until the
/// retry budget runs out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub provider: ProviderKind,
    /// Suggested wait before calling the same provider again.
    pub retry_delay_ms: u64,
    /// Attempt number (1-based) that raised the signal.
    pub attempt: u32,
}

impl RateLimitSignal {
    /// Build a signal, clamping the delay to `max_delay_ms`.
    pub fn new(provider: ProviderKind, retry_delay_ms: u64, attempt: u32, max_delay_ms: u64) -> Self {
        Self {
            provider,
            retry_delay_ms: retry_delay_ms.min(max_delay_ms),
            attempt,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Errors produced by the curation pipeline.
#[derive(Debug, Error)]
pub enum CurationError {
    /// Missing API key, endpoint or other unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller's input cannot be curated (e.g. empty text).
    #[error("invalid input: {0}")]
    Input(String),

    /// Timeout, connection failure, 408 or 5xx.
    #[error("{provider} is temporarily unavailable{}: {message}", status_suffix(.status))]
    Transient {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },

    /// One HTTP 429 response. `retry_delay_ms` is the provider's hint, if any.
    #[error("{provider} rate limit hit (HTTP 429): {message}")]
    RateLimit {
        provider: ProviderKind,
        retry_delay_ms: Option<u64>,
        message: String,
    },

    /// Every attempt was rate limited.
    #[error("{}", rate_limited_summary(.signal))]
    RateLimited {
        signal: RateLimitSignal,
        fallback: Option<FallbackSuggestion>,
    },

    /// 4xx other than 408/429, e.g. bad key or malformed request.
    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    Permanent {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /// The response did not match any known schema.
    #[error("could not parse provider response: {0}")]
    Parse(String),

    #[error("request cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn rate_limited_summary(signal: &RateLimitSignal) -> String {
    format!(
        "{} rate limit persisted after {} attempt(s); retry in {:.1}s",
        signal.provider,
        signal.attempt,
        signal.retry_delay_ms as f64 / 1000.0
    )
}

impl CurationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CurationError::Transient { .. } => ErrorClass::Transient,
            CurationError::RateLimit { .. } => ErrorClass::RateLimit,
            CurationError::Configuration(_)
            | CurationError::Input(_)
            | CurationError::RateLimited { .. }
            | CurationError::Permanent { .. }
            | CurationError::Parse(_)
            | CurationError::Cancelled => ErrorClass::Fatal,
        }
    }

    /// Provider hint carried by a single rate-limit response.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            CurationError::RateLimit { retry_delay_ms, .. } => *retry_delay_ms,
            CurationError::RateLimited { signal, .. } => Some(signal.retry_delay_ms),
            _ => None,
        }
    }

    pub fn rate_limit_signal(&self) -> Option<&RateLimitSignal> {
        match self {
            CurationError::RateLimited { signal, .. } => Some(signal),
            _ => None,
        }
    }

    /// Human-readable cause for display to end users.
    pub fn user_message(&self) -> String {
        match self {
            CurationError::Configuration(msg) => format!("Configuration problem: {msg}"),
            CurationError::Input(msg) => format!("Cannot curate this text: {msg}"),
            CurationError::Transient { provider, .. } => {
                format!("{provider} is not responding right now. Please try again shortly.")
            }
            CurationError::RateLimit { provider, .. } => {
                format!("{provider} is rate limiting requests.")
            }
            CurationError::RateLimited { signal, fallback } => {
                let wait = signal.retry_delay_ms.div_ceil(1000);
                let mut msg = format!(
                    "{} quota exhausted. Wait about {wait}s before trying again.",
                    signal.provider
                );
                if let Some(suggestion) = fallback {
                    if suggestion.usable {
                        msg.push_str(&format!(" You can switch to {} now.", suggestion.candidate));
                    } else {
                        msg.push_str(&format!(
                            " {} is an alternative once its API key is configured.",
                            suggestion.candidate
                        ));
                    }
                }
                msg
            }
            CurationError::Permanent { provider, status, .. } => match status {
                401 | 403 => format!("{provider} rejected the API key (HTTP {status})."),
                _ => format!("{provider} rejected the request (HTTP {status})."),
            },
            CurationError::Parse(_) => {
                "The provider returned a response that could not be read.".to_string()
            }
            CurationError::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}
