//! Transport concerns shared by every provider client.
//!
//! - [`retry`]: error classification, the [`RetryPolicy`] backoff schedule,
//!   `retryDelay` parsing, and the cancellable retry loop. Never retries
//!   401/403/400-class errors.
//! - [`usage`]: token counters, per-call trace IDs, and the cumulative
//!   [`UsageTracker`].

pub mod retry;
pub mod usage;

pub use retry::{RetryPolicy, classify_status, parse_retry_delay, run_with_retry};
pub use usage::{TokenUsage, UsageTracker, generate_trace_id};
