//! Turning provider JSON into a finished post.
//!
//! Three steps, used by the curator and the CLI alike:
//!
//! 1. [`extract_text`] finds the generated text in either provider schema,
//!    falling back to a recursive search for any `text` field.
//! 2. [`cleanup`] strips the model's commentary about its own work, markdown
//!    emphasis and excess whitespace.
//! 3. [`split_title_body_source`] separates headline, body and the
//!    `Sumber:` line.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::usage::TokenUsage;
use crate::error::CurationError;

/// Titles must be strictly shorter than this many characters.
pub const MAX_TITLE_CHARS: usize = 150;

/// Cleanup that leaves fewer characters than this is discarded.
pub const MIN_CLEANED_CHARS: usize = 50;

/// Text returned in place of a response that could not be read.
pub const DEGRADED_PLACEHOLDER: &str =
    "Maaf, respons daripada model tidak dapat dibaca. Sila cuba lagi.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response body is not JSON: {0}")]
    InvalidJson(String),
    #[error("no text field found in response")]
    NoText,
}

impl From<ParseError> for CurationError {
    fn from(err: ParseError) -> Self {
        CurationError::Parse(err.to_string())
    }
}

// ── Extraction ─────────────────────────────────────────────────────

/// Decode a raw response body.
pub fn parse_body(raw: &str) -> Result<Value, ParseError> {
    serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

/// Generated text from a provider response.
///
/// Tries `candidates[0].content.parts[0].text`, then
/// `choices[0].message.content`, then the first non-empty string under any
/// key named `text` (case-insensitive) in document order.
pub fn extract_text(body: &Value) -> Result<String, ParseError> {
    let gemini = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str);
    let openai = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str);

    gemini
        .filter(|t| !t.trim().is_empty())
        .or_else(|| openai.filter(|t| !t.trim().is_empty()))
        .or_else(|| find_text_field(body))
        .map(str::to_string)
        .ok_or(ParseError::NoText)
}

fn find_text_field(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            if key.eq_ignore_ascii_case("text")
                && let Some(s) = v.as_str()
                && !s.trim().is_empty()
            {
                return Some(s);
            }
            find_text_field(v)
        }),
        Value::Array(items) => items.iter().find_map(find_text_field),
        _ => None,
    }
}

/// Usage counters from `usageMetadata` (Gemini) or `usage` (OpenAI-style).
pub fn extract_usage(body: &Value) -> Option<TokenUsage> {
    let count = |obj: &Value, key: &str| {
        obj.get(key)
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
    };

    if let Some(meta) = body.get("usageMetadata").filter(|v| v.is_object()) {
        return Some(TokenUsage::from_parts(
            count(meta, "promptTokenCount"),
            count(meta, "candidatesTokenCount"),
            count(meta, "totalTokenCount"),
        ));
    }
    if let Some(usage) = body.get("usage").filter(|v| v.is_object()) {
        return Some(TokenUsage::from_parts(
            count(usage, "prompt_tokens"),
            count(usage, "completion_tokens"),
            count(usage, "total_tokens"),
        ));
    }
    None
}

// ── Cleanup ────────────────────────────────────────────────────────

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex")
}

/// Self-referential commentary, removed up to the end of its sentence or line.
static BANNED_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)\bsaya cuba[^.!?\n]*(?:[.!?\u{2026}]+|$)[ \t]*",
        r"(?im)\bsaya telah (menterjemah|menulis|mengolah|menyusun)[^.!?\n]*(?:[.!?\u{2026}]+|$)[ \t]*",
        r"(?im)\bsebagai (model bahasa|AI)[^.!?\n]*(?:[.!?\u{2026}]+|$)[ \t]*",
        r"(?im)\bberikut (adalah|ialah)[^:\n]*(?::|$)[ \t]*",
        r"(?im)\b(here is|here's) (the|your)[^:\n]*(?::|$)[ \t]*",
        r"(?im)^[ \t]*(nota|catatan|note)[ \t]*[:：].*$",
    ]
    .iter()
    .map(|p| compile(p))
    .collect()
});

static BOLD: LazyLock<Regex> = LazyLock::new(|| compile(r"\*\*([^*\n]+)\*\*"));
static ASIDE: LazyLock<Regex> = LazyLock::new(|| compile(r"\*[^*\n]+\*"));
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"[ \t]+"));
static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)[ \t]+$"));
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| compile(r"\n{3,}"));

/// Remove commentary and markdown noise from generated text.
///
/// Returns `text` unchanged when the cleaned result would be shorter than
/// [`MIN_CLEANED_CHARS`].
pub fn cleanup(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n");
    for re in BANNED_PHRASES.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out = BOLD.replace_all(&out, "$1").into_owned();
    out = ASIDE.replace_all(&out, "").into_owned();
    out = INLINE_SPACE.replace_all(&out, " ").into_owned();
    out = TRAILING_SPACE.replace_all(&out, "").into_owned();
    out = BLANK_RUNS.replace_all(&out, "\n\n").into_owned();
    let cleaned = out.trim();

    if cleaned.chars().count() < MIN_CLEANED_CHARS {
        text.to_string()
    } else {
        cleaned.to_string()
    }
}

// ── Splitting ──────────────────────────────────────────────────────

/// A post split into its parts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPost {
    pub title: Option<String>,
    pub body: String,
    /// The full citation line, e.g. `Sumber: ESPN`.
    pub source_citation: Option<String>,
}

impl ExtractedPost {
    /// Reassemble as title, body and citation separated by blank lines.
    pub fn to_text(&self) -> String {
        [self.title.as_deref(), Some(self.body.as_str()), self.source_citation.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

static SOURCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?im)^[ \t]*(sumber|source)[ \t]*[:：].*$"));
static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"\n[ \t]*\n"));

/// Separate the `Sumber:`/`Source:` line, then split title from body.
///
/// The first segment (up to the first blank line, else the first newline)
/// becomes the title only when it is non-empty, shorter than
/// [`MAX_TITLE_CHARS`] and leaves a non-empty body.
pub fn split_title_body_source(text: &str) -> ExtractedPost {
    let normalized = text.replace("\r\n", "\n");
    let source_citation = SOURCE_LINE
        .find(&normalized)
        .map(|m| m.as_str().trim().to_string());
    let without_source = SOURCE_LINE.replace_all(&normalized, "");
    let rest = without_source.trim();

    let mut paragraphs = BLANK_LINE.splitn(rest, 2);
    let split = match (paragraphs.next(), paragraphs.next()) {
        (Some(head), Some(tail)) => Some((head, tail)),
        _ => rest.split_once('\n'),
    };

    if let Some((head, tail)) = split {
        let title = head.trim();
        let body = tail.trim();
        if !title.is_empty() && title.chars().count() < MAX_TITLE_CHARS && !body.is_empty() {
            return ExtractedPost {
                title: Some(title.to_string()),
                body: body.to_string(),
                source_citation,
            };
        }
    }

    ExtractedPost {
        title: None,
        body: rest.to_string(),
        source_citation,
    }
}
