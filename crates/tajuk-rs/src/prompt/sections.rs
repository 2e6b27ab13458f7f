//! Section-based assembly of instruction text.

/// Builder for multi-section instructions.
///
/// Sections are joined with blank lines under `##` headings. Empty sections
/// (from `section_if` with a false condition, or empty content) are skipped.
///
/// # Example
///
/// ```
/// use tajuk_rs::prompt::sections::InstructionBuilder;
///
/// let prompt = InstructionBuilder::new("You are a sports editor.")
///     .section("Tone", "Formal.")
///     .section_if(false, "Quotes", || "Keep quotes.".into())
///     .bullets("Rules", ["No hashtags.", "No em-dash."])
///     .build();
///
/// assert!(prompt.contains("## Tone"));
/// assert!(!prompt.contains("## Quotes"));
/// assert!(prompt.contains("- No hashtags."));
/// ```
pub struct InstructionBuilder {
    sections: Vec<String>,
}

impl InstructionBuilder {
    /// Start with a preamble included as-is (no heading).
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a named section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n{content}"));
        }
        self
    }

    /// Conditionally append a section. `content_fn` runs only when needed.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    /// Append a section rendered as a `- ` bullet list. Empty items are
    /// dropped; no items means no section.
    pub fn bullets<I, S>(self, heading: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body = items
            .into_iter()
            .filter(|item| !item.as_ref().trim().is_empty())
            .map(|item| format!("- {}", item.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");
        self.section(heading, body)
    }

    /// Append a section rendered as a `1. ` numbered list.
    pub fn numbered<I, S>(self, heading: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");
        self.section(heading, body)
    }

    /// Join all sections with blank lines.
    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}
