//! Keyword fallback for intent classification
//!
//! Deterministic, no I/O. Used whenever the LLM classifier is unconfigured
//! or fails in any way.

use super::Intent;
use crate::session::contains_any;

/// Short courtesy phrases that mark a message as chat
const COURTESY: &[&str] = &[
    "як справи",
    "привіт",
    "дякую",
    "дяка",
    "ок",
    "окей",
    "hi",
    "hello",
    "thanks",
];

/// Messages shorter than this (in chars) may short-circuit to chat
const COURTESY_MAX_CHARS: usize = 60;

/// Action verbs (UA + EN)
const ACTION_TRIGGERS: &[&str] = &[
    "запусти",
    "порахуй",
    "створи",
    "відкрий",
    "скачай",
    "перевір",
    "зроби",
    "надішли",
    "знайди",
    "зміни",
    "онови",
    "напиши",
    "згенеруй",
    "проаналізуй",
    "побудуй",
    "розрахуй",
    "налаштуй",
    "видали",
    "run",
    "create",
    "open",
    "download",
    "check",
    "do ",
    "send",
    "find",
    "change",
    "update",
    "write",
    "generate",
    "analyze",
    "build",
    "calculate",
    "setup",
    "configure",
    "delete",
];

const HOW_TO: &[&str] = &["як зробити", "як налаштувати", "how to", "інструкц"];

/// Classify text without any network call
#[must_use]
pub fn classify(text: &str) -> Intent {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return Intent::Chat;
    }

    let short = lower.chars().count() < COURTESY_MAX_CHARS;
    let has_digits = lower.chars().any(|c| c.is_ascii_digit());
    if short && !has_digits && contains_any(&lower, COURTESY) {
        return Intent::Chat;
    }

    if contains_any(&lower, ACTION_TRIGGERS) || contains_any(&lower, HOW_TO) {
        return Intent::Task;
    }

    Intent::Chat
}
