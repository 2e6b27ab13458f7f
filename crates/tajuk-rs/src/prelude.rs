//! Convenience re-exports for common `tajuk-rs` types.
//!
//! ```ignore
//! use tajuk_rs::prelude::*;
//! ```
//!
//! Covers requests and results, provider configuration, the [`Curator`],
//! errors, and event handlers. Prompt internals and the raw provider clients
//! are left out; import those from their modules when needed.

// ── Requests and results ────────────────────────────────────────────
pub use crate::{CurationRequest, CurationResult, Operation, Refinement, Tone};
pub use crate::response::ExtractedPost;

// ── Configuration ───────────────────────────────────────────────────
pub use crate::api::retry::RetryPolicy;
pub use crate::config::{CuratorConfig, ProviderConfig, ProviderKind, ProviderSettings};
pub use crate::prompt::TechnicalHeuristic;

// ── Running calls ───────────────────────────────────────────────────
pub use crate::api::usage::TokenUsage;
pub use crate::curator::Curator;
pub use crate::error::{CurationError, RateLimitSignal};
pub use crate::fallback::{FallbackAdvisor, FallbackDecision, FallbackSuggestion};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, CurationEvent, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler,
};

pub use tokio_util::sync::CancellationToken;
