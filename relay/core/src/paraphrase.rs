//! Directive Paraphraser
//!
//! Rewrites casual phrasing ("could you please open the report?") into an
//! imperative directive ("Open the report.") before it is dispatched to the
//! execution backend.
//!
//! The relay only needs a pure `&str -> String` transformation, so the seam
//! is the [`DirectiveParaphraser`] trait. [`TemplateParaphraser`] is the
//! built-in rule-based implementation.

/// Rewrites a user message into an instruction
pub trait DirectiveParaphraser: Send + Sync {
    /// Produce the directive. Must return the input unchanged rather than an
    /// empty string when it has nothing to offer.
    fn paraphrase(&self, message: &str) -> String;
}

/// Leading politeness / request framings, longest first
const SOFTENERS: &[&str] = &[
    "could you please",
    "can you please",
    "would you please",
    "could you",
    "can you",
    "would you",
    "please",
    "i want you to",
    "i need you to",
    "чи не міг би ти",
    "чи можеш ти",
    "чи можеш",
    "будь ласка",
    "будь-ласка",
    "можеш",
    "можна",
    "прошу",
];

/// Rule-based paraphraser
///
/// Strips leading softeners (repeatedly, so "please, can you ..." works),
/// a trailing "please", and trailing question marks, then capitalizes and
/// terminates the sentence with a period.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateParaphraser;

impl TemplateParaphraser {
    /// Create a new paraphraser
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn strip_leading_softener(text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        SOFTENERS.iter().find_map(|softener| {
            let rest = lower.strip_prefix(softener)?;
            // whole words only
            if rest.chars().next().is_some_and(char::is_alphanumeric) {
                return None;
            }
            // lowercase may change byte lengths; map back by char count
            let skip = softener.chars().count();
            let offset = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
            Some(text[offset..].trim_start_matches(|c: char| c.is_whitespace() || c == ','))
        })
    }

    fn strip_trailing_please(text: &str) -> &str {
        let lower = text.to_lowercase();
        for tail in [", please", " please", ", будь ласка", " будь ласка"] {
            if lower.ends_with(tail) {
                let keep = text.chars().count() - tail.chars().count();
                let end = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
                return text[..end].trim_end();
            }
        }
        text
    }
}

impl DirectiveParaphraser for TemplateParaphraser {
    fn paraphrase(&self, message: &str) -> String {
        let original = message.trim();
        let mut text = original;

        while let Some(rest) = Self::strip_leading_softener(text) {
            if rest == text {
                break;
            }
            text = rest;
        }

        text = text.trim_end_matches(|c: char| c == '?' || c.is_whitespace());
        text = Self::strip_trailing_please(text);
        text = text.trim_end_matches(|c: char| c == '?' || c == ',' || c.is_whitespace());

        if text.is_empty() {
            return message.to_string();
        }

        let mut chars = text.chars();
        let mut directive: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return message.to_string(),
        };

        if !directive.ends_with(['.', '!', '…']) {
            directive.push('.');
        }

        directive
    }
}
