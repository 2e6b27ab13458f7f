//! Provider fallback after rate-limit exhaustion.
//!
//! Rotation is fixed: `gemini → groq → openrouter → gemini`. A candidate is
//! usable only if its configuration already carries a non-empty API key. The
//! caller decides whether to switch and retry or to wait out the suggested
//! delay; [`FallbackAdvisor::decide`] encodes the usual choice.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::RateLimitSignal;

/// The provider that follows `current` in the rotation.
pub fn next_in_rotation(current: ProviderKind) -> ProviderKind {
    match current {
        ProviderKind::Gemini => ProviderKind::Groq,
        ProviderKind::Groq => ProviderKind::OpenRouter,
        ProviderKind::OpenRouter => ProviderKind::Gemini,
    }
}

/// An alternate provider and whether it can be used right away.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackSuggestion {
    pub current: ProviderKind,
    pub candidate: ProviderKind,
    pub usable: bool,
}

/// What to do after a [`RateLimitSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Retry the call on this provider now.
    SwitchTo(ProviderKind),
    /// No usable alternative; wait this long before retrying the same provider.
    Wait(Duration),
}

/// Suggests alternate providers from the configured set.
#[derive(Debug, Clone, Copy)]
pub struct FallbackAdvisor<'a> {
    settings: &'a ProviderSettings,
}

impl<'a> FallbackAdvisor<'a> {
    pub fn new(settings: &'a ProviderSettings) -> Self {
        Self { settings }
    }

    /// Next provider in the rotation and whether it has credentials.
    pub fn suggest_fallback(&self, current: ProviderKind) -> FallbackSuggestion {
        let candidate = next_in_rotation(current);
        FallbackSuggestion {
            current,
            candidate,
            usable: self.settings.is_usable(candidate),
        }
    }

    /// Switch when the candidate is usable, otherwise wait out the signal.
    pub fn decide(&self, signal: &RateLimitSignal) -> FallbackDecision {
        let suggestion = self.suggest_fallback(signal.provider);
        if suggestion.usable {
            FallbackDecision::SwitchTo(suggestion.candidate)
        } else {
            FallbackDecision::Wait(signal.retry_delay())
        }
    }
}
