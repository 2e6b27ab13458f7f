//! Instruction text for curation and refinement calls.
//!
//! [`PromptBuilder`] analyses the source text (length, direct quotes,
//! tactical vocabulary), picks one of three [`Template`]s and appends the
//! constraint block every call carries: Bahasa Melayu only, no filler
//! phrases, no em-dash, and explicit hashtag and `Sumber:` rules.
//!
//! Building a prompt cannot fail.

pub mod sections;

use regex::Regex;

use crate::{CurationRequest, Refinement, Tone};
use sections::InstructionBuilder;

/// Filler phrases the model is told never to produce.
pub const FORBIDDEN_FILLER: &[&str] = &[
    "Berikut adalah",
    "Berikut ialah",
    "Sebagai kesimpulan",
    "Secara keseluruhannya",
    "Tidak dapat dinafikan",
    "Dalam dunia bola sepak",
    "Saya cuba",
];

const EM_DASH: char = '\u{2014}';

// ── Content analysis ───────────────────────────────────────────────

/// Target output length, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBand {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl LengthBand {
    /// `[max(50, 0.4·L), max(100, 0.6·L)]`, floored.
    pub fn for_input_chars(chars: usize) -> Self {
        Self {
            min_chars: (chars * 2 / 5).max(50),
            max_chars: (chars * 3 / 5).max(100),
        }
    }

    pub fn for_text(text: &str) -> Self {
        Self::for_input_chars(text.chars().count())
    }
}

/// Decides when the source reads like tactical analysis.
///
/// Keywords are counted case-insensitively as whole words (a trailing plural
/// `s` is allowed), and every occurrence counts. Inputs shorter than
/// `min_length` characters are never technical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicalHeuristic {
    pub keywords: Vec<String>,
    pub min_hits: usize,
    pub min_length: usize,
}

impl Default for TechnicalHeuristic {
    fn default() -> Self {
        let keywords = [
            "formation",
            "tactical",
            "pressing",
            "possession",
            "midfield",
            "counter-attack",
            "high line",
            "low block",
            "back three",
            "back four",
            "full-back",
            "wing-back",
            "false nine",
            "expected goals",
            "xg",
            "build-up",
            "transition",
            "overload",
            "half-space",
            "4-3-3",
            "4-4-2",
            "4-2-3-1",
            "3-5-2",
            "3-4-3",
            "5-3-2",
        ];
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            min_hits: 5,
            min_length: 2000,
        }
    }
}

impl TechnicalHeuristic {
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_hits(mut self, min_hits: usize) -> Self {
        self.min_hits = min_hits;
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Total keyword occurrences in `text`.
    pub fn count_hits(&self, text: &str) -> usize {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .filter_map(|k| Regex::new(&keyword_pattern(k)).ok())
            .map(|re| re.find_iter(text).count())
            .sum()
    }

    pub fn is_technical(&self, text: &str) -> bool {
        text.chars().count() >= self.min_length && self.count_hits(text) >= self.min_hits
    }
}

/// `\b` is only added next to alphanumeric edges so `4-3-3` and
/// `counter-attack` still anchor correctly.
fn keyword_pattern(keyword: &str) -> String {
    let mut pattern = String::from("(?i)");
    if keyword.starts_with(char::is_alphanumeric) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(keyword));
    if keyword.ends_with(char::is_alphanumeric) {
        pattern.push_str(r"s?\b");
    }
    pattern
}

/// What the builder learned about one source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentProfile {
    pub chars: usize,
    pub band: LengthBand,
    pub has_quotes: bool,
    pub technical: bool,
}

impl ContentProfile {
    pub fn analyze(text: &str, heuristic: &TechnicalHeuristic) -> Self {
        let chars = text.chars().count();
        Self {
            chars,
            band: LengthBand::for_input_chars(chars),
            has_quotes: has_direct_quotes(text),
            technical: heuristic.is_technical(text),
        }
    }
}

/// ASCII or typographic double quotes.
pub fn has_direct_quotes(text: &str) -> bool {
    text.contains(['"', '\u{201C}', '\u{201D}'])
}

/// Layout the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Narrative,
    TechnicalAnalysis,
    PreserveStructure,
}

impl Template {
    /// `preserve_structure` wins over the technical heuristic.
    pub fn select(profile: &ContentProfile, preserve_structure: bool) -> Self {
        if preserve_structure {
            Template::PreserveStructure
        } else if profile.technical {
            Template::TechnicalAnalysis
        } else {
            Template::Narrative
        }
    }

    fn layout(self) -> &'static str {
        match self {
            Template::Narrative => {
                "Start with a short headline on its own line (under 150 characters), then a blank \
                 line, then the body in short paragraphs. Lead with the most newsworthy fact."
            }
            Template::TechnicalAnalysis => {
                "Start with a short headline on its own line (under 150 characters), then a blank \
                 line, then a one-paragraph summary. Organise the rest of the body under these \
                 headings, each on its own line: Key Stats, Formations, Tactical Shifts. Keep every \
                 figure, score and formation exactly as given."
            }
            Template::PreserveStructure => {
                "Keep the layout of the source exactly: same paragraph order, line breaks, lists \
                 and headings. Translate each part in place. Do not merge, reorder or summarise, \
                 and do not add a headline the source does not have."
            }
        }
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Builds the instruction sent to the provider.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    heuristic: TechnicalHeuristic,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heuristic(heuristic: TechnicalHeuristic) -> Self {
        Self { heuristic }
    }

    pub fn heuristic(&self) -> &TechnicalHeuristic {
        &self.heuristic
    }

    /// Instruction for a first draft. Hashtags are requested.
    pub fn build_initial_prompt(
        &self,
        tone: Tone,
        text: &str,
        include_source: bool,
        preserve_structure: bool,
    ) -> String {
        self.initial(tone, text, include_source, preserve_structure, true, &[])
    }

    /// Instruction for a first draft from a full request. Refinements on the
    /// request are folded in as extra adjustments.
    pub fn build_for_request(&self, request: &CurationRequest) -> String {
        self.initial(
            request.tone,
            &request.text,
            request.include_source_citation,
            request.preserve_structure,
            request.include_hashtags,
            &request.refinements,
        )
    }

    fn initial(
        &self,
        tone: Tone,
        text: &str,
        include_source: bool,
        preserve_structure: bool,
        include_hashtags: bool,
        refinements: &[Refinement],
    ) -> String {
        let profile = ContentProfile::analyze(text, &self.heuristic);
        let template = Template::select(&profile, preserve_structure);
        let hashtags = hashtag_rule_for(refinements, Some(include_hashtags));

        InstructionBuilder::new(
            "You are a senior football journalist writing for a Malaysian social-media \
             audience. Rewrite the English source text below as an original post in Bahasa \
             Melayu.",
        )
        .section("Tone", tone_rule(tone))
        .section(
            "Length",
            format!(
                "Aim for between {} and {} characters. The source is {} characters long.",
                profile.band.min_chars, profile.band.max_chars, profile.chars
            ),
        )
        .section("Structure", template.layout())
        .section_if(profile.has_quotes, "Quotes", || {
            "The source contains direct quotes. Translate them faithfully inside quotation \
             marks and keep the attribution to whoever said them."
                .to_string()
        })
        .numbered(
            "Additional adjustments",
            refinements
                .iter()
                .filter(|r| !is_hashtag_refinement(**r))
                .map(|r| refinement_directive(*r, None)),
        )
        .bullets("Rules", constraint_block(hashtags, source_rule_initial(include_source)))
        .section("Source text", delimit(text))
        .build()
    }

    /// Instruction for revising an existing post. One change per refinement,
    /// in the order given.
    pub fn build_refinement_prompt(
        &self,
        original_post: &str,
        refinements: &[Refinement],
        include_source: bool,
    ) -> String {
        let band = LengthBand::for_text(original_post);
        let changes: Vec<String> = if refinements.is_empty() {
            vec!["Polish the post lightly without changing its meaning.".to_string()]
        } else {
            refinements
                .iter()
                .map(|r| refinement_directive(*r, Some(band)))
                .collect()
        };
        let hashtags = hashtag_rule_for(refinements, None);

        InstructionBuilder::new(
            "You are editing a Bahasa Melayu football post that has already been written. \
             Apply the changes below and return the full revised post.",
        )
        .numbered("Changes", changes)
        .bullets("Rules", constraint_block(hashtags, source_rule_refine(include_source)))
        .section("Post", delimit(original_post))
        .build()
    }
}

// ── Rule text ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashtagRule {
    Include,
    Omit,
    Keep,
}

/// Explicit refinements override the request flag. `None` means keep
/// whatever the post already has.
fn hashtag_rule_for(refinements: &[Refinement], flag: Option<bool>) -> HashtagRule {
    let last = refinements.iter().rev().find(|r| is_hashtag_refinement(**r));
    match (last, flag) {
        (Some(Refinement::AddHashtags), _) => HashtagRule::Include,
        (Some(_), _) => HashtagRule::Omit,
        (None, Some(true)) => HashtagRule::Include,
        (None, Some(false)) => HashtagRule::Omit,
        (None, None) => HashtagRule::Keep,
    }
}

fn is_hashtag_refinement(r: Refinement) -> bool {
    matches!(r, Refinement::AddHashtags | Refinement::RemoveHashtags)
}

fn tone_rule(tone: Tone) -> &'static str {
    match tone {
        Tone::Formal => {
            "Formal. Use standard Bahasa Melayu (bahasa baku) suitable for a news outlet. No slang."
        }
        Tone::Casual => {
            "Casual. Write the way Malaysian football fans talk online. Light slang is fine, but \
             keep every fact exact."
        }
    }
}

fn refinement_directive(refinement: Refinement, band: Option<LengthBand>) -> String {
    match refinement {
        Refinement::Rephrase => {
            "Rephrase the post with fresh wording and sentence structure while keeping every \
             fact, name and number."
                .to_string()
        }
        Refinement::RecheckFlow => {
            "Check the flow. Fix awkward transitions, grammar and paragraph order so the post \
             reads naturally from start to finish."
                .to_string()
        }
        Refinement::ShortenDetailed => match band {
            Some(band) => format!(
                "Shorten the post to between {} and {} characters, keeping the key facts, scores \
                 and quotes.",
                band.min_chars, band.max_chars
            ),
            None => "Keep the post compact: key facts, scores and quotes only.".to_string(),
        },
        Refinement::MakeFormal => {
            "Switch to a formal register: standard Bahasa Melayu, no slang.".to_string()
        }
        Refinement::MakeCasual => {
            "Switch to a casual register, the way Malaysian fans talk online, keeping the facts \
             exact."
                .to_string()
        }
        Refinement::AddHashtags => {
            "Add 2 to 4 relevant hashtags on one line at the end of the body.".to_string()
        }
        Refinement::RemoveHashtags => "Remove every hashtag.".to_string(),
    }
}

fn source_rule_initial(include: bool) -> &'static str {
    if include {
        "Finish with one final line in the form `Sumber: <original outlet>`."
    } else {
        "Do not add a `Sumber:` line or any other source attribution."
    }
}

fn source_rule_refine(include: bool) -> &'static str {
    if include {
        "Keep the `Sumber:` line as the final line of the post."
    } else {
        "Remove any `Sumber:` line and do not add source attribution."
    }
}

fn constraint_block(hashtags: HashtagRule, source_rule: &str) -> Vec<String> {
    let mut rules = vec![
        "Write only in Bahasa Melayu. Keep player, club and competition names in their \
         original form."
            .to_string(),
        format!(
            "Never use these filler phrases: {}.",
            FORBIDDEN_FILLER
                .iter()
                .map(|p| format!("\"{p}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        format!("Never use the em-dash character ({EM_DASH}). Use commas or full stops instead."),
        "Output only the post. No notes, explanations or comments about the translation."
            .to_string(),
    ];
    match hashtags {
        HashtagRule::Include => {
            rules.push("End the body with 2 to 4 relevant hashtags on one line.".to_string())
        }
        HashtagRule::Omit => rules.push("Do not include any hashtags.".to_string()),
        HashtagRule::Keep => {}
    }
    rules.push(source_rule.to_string());
    rules
}

fn delimit(text: &str) -> String {
    format!("\"\"\"\n{}\n\"\"\"", text.trim())
}
