//! Curation pipeline that turns raw English football text into a Bahasa
//! Melayu social-media post.
//!
//! `tajuk-rs` builds tone-controlled prompts, sends them to one of several
//! interchangeable LLM providers (Gemini, Groq, OpenRouter), retries
//! transient and rate-limited failures with backoff, suggests an alternate
//! provider when a quota is exhausted, and splits the generated text into a
//! title, body and source citation.
//!
//! # Getting started
//!
//! ```ignore
//! use tajuk_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CurationError> {
//!     let settings = ProviderSettings::from_env();
//!     let config = settings.require(ProviderKind::Gemini)?;
//!
//!     let curator = Curator::new(CuratorConfig::default())?
//!         .with_event_handler(&LoggingHandler)
//!         .with_settings(settings.clone());
//!
//!     let request = CurationRequest::new("Arsenal beat Chelsea 2-1 ...", Tone::Casual)
//!         .with_source_citation(true);
//!
//!     let result = curator.curate(&request, config).await?;
//!     let post = result.post();
//!     println!("{}", post.title.as_deref().unwrap_or(""));
//!     println!("{}", post.body);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Prompt construction:** [`prompt::PromptBuilder`], with the
//!   [`prompt::TechnicalHeuristic`] that picks the tactical-analysis template.
//! - **HTTP clients:** [`provider::ProviderClient`] and its two
//!   implementations, [`provider::GeminiClient`] and
//!   [`provider::OpenAiCompatClient`].
//! - **Retry and backoff:** [`api::retry`] holds the [`RetryPolicy`] and the
//!   retry loop shared by every client.
//! - **Parsing output:** [`response`] extracts, cleans and splits text.
//! - **The entry point:** [`curator::Curator`] ties the pieces together;
//!   [`fallback`] handles quota exhaustion.
//! - **Observing calls:** implement [`events::EventHandler`] or use
//!   [`events::LoggingHandler`].

pub mod api;
pub mod config;
pub mod curator;
pub mod error;
pub mod events;
pub mod fallback;
pub mod prelude;
pub mod prompt;
pub mod provider;
pub mod response;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use api::retry::RetryPolicy;
pub use api::usage::TokenUsage;
pub use config::{CuratorConfig, ProviderConfig, ProviderKind, ProviderSettings};
pub use curator::Curator;
pub use error::{CurationError, RateLimitSignal};
pub use response::ExtractedPost;

// ── Constants ──────────────────────────────────────────────────────

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default sampling temperature for curation calls.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default output token ceiling for curation calls.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

// ── Request types ──────────────────────────────────────────────────

/// Writing style of the generated post.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Formal,
    Casual,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Formal => write!(f, "formal"),
            Tone::Casual => write!(f, "casual"),
        }
    }
}

impl FromStr for Tone {
    type Err = CurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "formal" => Ok(Tone::Formal),
            "casual" => Ok(Tone::Casual),
            other => Err(CurationError::Input(format!(
                "unknown tone '{other}' (expected formal or casual)"
            ))),
        }
    }
}

/// A post-hoc transformation applied to an already generated post.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Refinement {
    Rephrase,
    RecheckFlow,
    ShortenDetailed,
    MakeFormal,
    MakeCasual,
    AddHashtags,
    RemoveHashtags,
}

impl Refinement {
    pub const ALL: [Refinement; 7] = [
        Refinement::Rephrase,
        Refinement::RecheckFlow,
        Refinement::ShortenDetailed,
        Refinement::MakeFormal,
        Refinement::MakeCasual,
        Refinement::AddHashtags,
        Refinement::RemoveHashtags,
    ];

    /// The snake_case tag used on the command line and in serialized requests.
    pub fn tag(self) -> &'static str {
        match self {
            Refinement::Rephrase => "rephrase",
            Refinement::RecheckFlow => "recheck_flow",
            Refinement::ShortenDetailed => "shorten_detailed",
            Refinement::MakeFormal => "make_formal",
            Refinement::MakeCasual => "make_casual",
            Refinement::AddHashtags => "add_hashtags",
            Refinement::RemoveHashtags => "remove_hashtags",
        }
    }

    /// Parse a list of tags, keeping the first occurrence of each.
    pub fn parse_list<S: AsRef<str>>(tags: &[S]) -> Result<Vec<Refinement>, CurationError> {
        let mut out: Vec<Refinement> = Vec::with_capacity(tags.len());
        for tag in tags {
            let refinement: Refinement = tag.as_ref().parse()?;
            if !out.contains(&refinement) {
                out.push(refinement);
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Refinement {
    type Err = CurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Refinement::ALL
            .iter()
            .copied()
            .find(|r| r.tag() == normalized)
            .ok_or_else(|| CurationError::Input(format!("unknown refinement '{}'", s.trim())))
    }
}

/// One user action: raw text plus the options that shape the post.
///
/// Refinements are kept in request order without duplicates.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CurationRequest {
    pub text: String,
    pub tone: Tone,
    pub include_source_citation: bool,
    pub preserve_structure: bool,
    pub include_hashtags: bool,
    #[serde(default)]
    pub refinements: Vec<Refinement>,
}

impl CurationRequest {
    pub fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            tone,
            include_source_citation: false,
            preserve_structure: false,
            include_hashtags: true,
            refinements: Vec::new(),
        }
    }

    pub fn with_source_citation(mut self, include: bool) -> Self {
        self.include_source_citation = include;
        self
    }

    pub fn with_preserve_structure(mut self, preserve: bool) -> Self {
        self.preserve_structure = preserve;
        self
    }

    pub fn with_hashtags(mut self, include: bool) -> Self {
        self.include_hashtags = include;
        self
    }

    /// Append a refinement unless it is already present.
    pub fn with_refinement(mut self, refinement: Refinement) -> Self {
        if !self.refinements.contains(&refinement) {
            self.refinements.push(refinement);
        }
        self
    }

    /// Reject requests whose text is empty or whitespace.
    pub fn validate(&self) -> Result<(), CurationError> {
        if self.text.trim().is_empty() {
            return Err(CurationError::Input("source text is empty".into()));
        }
        Ok(())
    }
}

// ── Result types ───────────────────────────────────────────────────

/// Which pipeline entry point produced a result.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Curate,
    Refine,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Curate => write!(f, "curate"),
            Operation::Refine => write!(f, "refine"),
        }
    }
}

/// Outcome of a successful curation or refinement call.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CurationResult {
    /// Cleaned generated text.
    pub text: String,
    /// Token usage reported by the provider (zeroes when it reported none).
    pub usage: TokenUsage,
    pub provider: ProviderKind,
    /// Number of attempts the retry loop needed, in `1..=max_retries`.
    pub attempts: u32,
    pub trace_id: String,
    /// True when the response could not be parsed and `text` is a placeholder.
    pub degraded: bool,
}

impl CurationResult {
    /// Split the text into title, body and source citation.
    pub fn post(&self) -> ExtractedPost {
        response::split_title_body_source(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_parses_case_insensitively() {
        assert_eq!("Formal".parse::<Tone>().unwrap(), Tone::Formal);
        assert_eq!(" casual ".parse::<Tone>().unwrap(), Tone::Casual);
        assert!("angry".parse::<Tone>().is_err());
    }

    #[test]
    fn refinement_tags_round_trip() {
        for r in Refinement::ALL {
            assert_eq!(r.tag().parse::<Refinement>().unwrap(), r);
        }
        assert_eq!(
            "shorten-detailed".parse::<Refinement>().unwrap(),
            Refinement::ShortenDetailed
        );
    }

    #[test]
    fn refinement_list_is_ordered_and_deduplicated() {
        let parsed =
            Refinement::parse_list(&["recheck_flow", "rephrase", "recheck_flow"]).unwrap();
        assert_eq!(parsed, vec![Refinement::RecheckFlow, Refinement::Rephrase]);
    }

    #[test]
    fn unknown_refinement_is_input_error() {
        let err = Refinement::parse_list(&["translate_to_klingon"]).unwrap_err();
        assert!(matches!(err, CurationError::Input(_)));
    }

    #[test]
    fn empty_request_is_rejected() {
        let req = CurationRequest::new("   \n ", Tone::Formal);
        assert!(matches!(req.validate(), Err(CurationError::Input(_))));
        assert!(CurationRequest::new("Goal!", Tone::Casual).validate().is_ok());
    }

    #[test]
    fn request_serializes_snake_case() {
        let req = CurationRequest::new("text", Tone::Casual)
            .with_refinement(Refinement::ShortenDetailed)
            .with_refinement(Refinement::ShortenDetailed);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tone"], "casual");
        assert_eq!(json["refinements"], serde_json::json!(["shorten_detailed"]));
    }
}
