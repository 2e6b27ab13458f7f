//! Events emitted while a curation call runs, and handlers that observe them.
//!
//! The retry loop and the [`Curator`](crate::curator::Curator) report each
//! step as a [`CurationEvent`]. Callers implement [`EventHandler`] to drive a
//! progress display, count retries, or log.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget calls |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::Operation;
use crate::api::usage::TokenUsage;
use crate::config::ProviderKind;
use crate::error::{CurationError, RateLimitSignal};
use crate::fallback::FallbackSuggestion;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum CurationEvent<'a> {
    /// A curate or refine call is starting.
    CallStarted {
        trace_id: &'a str,
        operation: Operation,
        provider: ProviderKind,
        prompt_chars: usize,
    },
    /// One HTTP attempt is about to be made.
    AttemptStarted {
        provider: ProviderKind,
        attempt: u32,
        max_attempts: u32,
    },
    /// An attempt failed and the loop will sleep for `delay` before the next.
    RetryScheduled {
        provider: ProviderKind,
        attempt: u32,
        delay: Duration,
        error: &'a CurationError,
    },
    /// Every attempt was rate limited.
    RateLimitExhausted { signal: &'a RateLimitSignal },
    /// The advisor picked an alternate provider after a rate limit.
    FallbackSuggested { suggestion: &'a FallbackSuggestion },
    /// Usage counters reported by the provider.
    TokenUsage {
        provider: ProviderKind,
        usage: &'a TokenUsage,
    },
    /// The response could not be parsed; a placeholder was returned.
    Degraded {
        provider: ProviderKind,
        reason: &'a str,
    },
    /// The call produced text.
    Completed {
        trace_id: &'a str,
        provider: ProviderKind,
        attempts: u32,
        chars: usize,
    },
}

/// Handler for curation events.
///
/// Events are informational; handlers cannot alter the call. The default
/// implementation ignores everything.
///
/// # Example
///
/// ```ignore
/// struct RetryCounter(AtomicU32);
///
/// impl EventHandler for RetryCounter {
///     fn on_event(&self, event: &CurationEvent<'_>) {
///         if let CurationEvent::RetryScheduled { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &CurationEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CurationEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CurationEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CurationEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CurationEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches each event to every inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(show_progress, ProgressHandler::default());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CurationEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CurationEvent<'_>) {
        match event {
            CurationEvent::CallStarted {
                trace_id,
                operation,
                provider,
                prompt_chars,
            } => {
                info!("[{trace_id}] {operation} via {provider} ({prompt_chars} prompt chars)");
            }
            CurationEvent::AttemptStarted {
                provider,
                attempt,
                max_attempts,
            } => {
                debug!("{provider}: attempt {attempt}/{max_attempts}");
            }
            CurationEvent::RetryScheduled {
                provider,
                attempt,
                delay,
                error,
            } => {
                debug!("{provider}: retry after attempt {attempt} in {delay:?} ({error})");
            }
            CurationEvent::RateLimitExhausted { signal } => {
                warn!(
                    "{}: rate limited at attempt {}, suggested wait {}ms",
                    signal.provider, signal.attempt, signal.retry_delay_ms
                );
            }
            CurationEvent::FallbackSuggested { suggestion } => {
                info!(
                    "Fallback from {} to {} ({})",
                    suggestion.current,
                    suggestion.candidate,
                    if suggestion.usable { "usable" } else { "no API key" }
                );
            }
            CurationEvent::TokenUsage { provider, usage } => {
                debug!(
                    "{provider} tokens: prompt={}, completion={}, total={}",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
            }
            CurationEvent::Degraded { provider, reason } => {
                warn!("{provider}: unreadable response, returning placeholder ({reason})");
            }
            CurationEvent::Completed {
                trace_id,
                provider,
                attempts,
                chars,
            } => {
                info!("[{trace_id}] {provider} produced {chars} chars in {attempts} attempt(s)");
            }
        }
    }
}
