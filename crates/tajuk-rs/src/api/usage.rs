//! Correlation IDs and token-usage bookkeeping.
//!
//! Each curation call gets a `trace_id` that tags its log lines. Usage
//! counters reported by providers are normalised into [`TokenUsage`] and
//! accumulated per provider by [`UsageTracker`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Operation;
use crate::config::ProviderKind;

/// Generate a unique trace ID for a curation call.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Token counters for one provider call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build from provider counters, deriving the total when it is missing.
    pub fn from_parts(prompt: Option<u32>, completion: Option<u32>, total: Option<u32>) -> Self {
        let prompt_tokens = prompt.unwrap_or(0);
        let completion_tokens = completion.unwrap_or(0);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total.unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// One recorded call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub provider: ProviderKind,
    pub operation: Operation,
    pub usage: TokenUsage,
    pub trace_id: String,
    pub at: DateTime<Utc>,
}

/// Running totals for one provider.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Cumulative usage across calls made through one curator.
#[derive(Debug, Default)]
pub struct UsageTracker {
    totals: BTreeMap<ProviderKind, ProviderTotals>,
    last: Option<UsageRecord>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage for a completed call.
    pub fn record(
        &mut self,
        provider: ProviderKind,
        operation: Operation,
        usage: TokenUsage,
        trace_id: &str,
    ) {
        let totals = self.totals.entry(provider).or_default();
        totals.calls += 1;
        totals.prompt_tokens += u64::from(usage.prompt_tokens);
        totals.completion_tokens += u64::from(usage.completion_tokens);
        totals.total_tokens += u64::from(usage.total_tokens);
        self.last = Some(UsageRecord {
            provider,
            operation,
            usage,
            trace_id: trace_id.to_string(),
            at: Utc::now(),
        });
    }

    /// The most recent call's record.
    pub fn last(&self) -> Option<&UsageRecord> {
        self.last.as_ref()
    }

    pub fn totals_for(&self, provider: ProviderKind) -> ProviderTotals {
        self.totals.get(&provider).copied().unwrap_or_default()
    }

    /// Total tokens consumed across all providers.
    pub fn total_tokens(&self) -> u64 {
        self.totals.values().map(|t| t.total_tokens).sum()
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        if self.totals.is_empty() {
            return "no calls recorded".to_string();
        }
        self.totals
            .iter()
            .map(|(provider, t)| {
                format!(
                    "{provider}: {} call(s), {} prompt + {} completion = {} tokens",
                    t.calls, t.prompt_tokens, t.completion_tokens, t.total_tokens
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
