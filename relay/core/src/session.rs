//! Session Namer
//!
//! Derives a session category and a session name from free text. Both
//! functions are pure: no I/O, no clock. Only [`SessionDescriptor::derive`]
//! takes a timestamp, and it takes it as an argument.
//!
//! # Keyword Matching
//!
//! Keywords match at the start of a word, so `створи` matches `створити` but
//! `hi` does not match `this`. Rules are evaluated in order and the first hit
//! wins: conversational → `chat`, action-initiation → `new_session`,
//! continuation → `continue_session`, otherwise `chat`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Greetings and identity questions
const CHAT_KEYWORDS: &[&str] = &[
    "привіт",
    "вітаю",
    "добрий день",
    "добрий вечір",
    "що чутно",
    "як справи",
    "hi",
    "hello",
    "hey",
    "how are you",
    "how’s it going",
    "how's it going",
    "who are you",
    "як тебе звати",
    "як звати",
    "як тебе кличуть",
    "tell me about yourself",
    "поговоримо",
    "просто чат",
];

/// Action-initiation verbs and nouns
const NEW_SESSION_KEYWORDS: &[&str] = &[
    "відкрий",
    "знайди",
    "створи",
    "почни",
    "запусти",
    "нове",
    "завдання",
    "проект",
    "робота",
    "старт",
    "init",
    "open",
    "find",
    "create",
    "start",
    "new",
    "task",
    "project",
];

/// Continuation adverbs and follow-up verbs
const CONTINUE_KEYWORDS: &[&str] = &[
    "продовжи",
    "далі",
    "також",
    "тепер",
    "потім",
    "ще",
    "додай",
    "зміни",
    "покращи",
    "зроби",
    "включи",
    "натисни",
    "continue",
    "next",
    "also",
    "now",
    "add",
    "change",
];

/// Domain labels, checked in order
const NAME_LABELS: &[(&[&str], &str)] = &[
    (&["відео", "фільм", "youtube", "браузер", "video", "browser"], "video_browser"),
    (&["музик", "пісн", "аудіо", "music", "song", "audio"], "music_player"),
    (&["документ", "файл", "текст", "document", "file", "text"], "document_editor"),
    (&["калькулятор", "рахунок", "математик", "calculator", "math"], "calculator"),
    (&["систем", "статус", "моніторинг", "system", "status", "monitor"], "system_monitor"),
];

/// Name used for every chat-category session
pub const CHAT_SESSION_NAME: &str = "general_chat";

/// Fallback label when no domain keyword matches
pub const DEFAULT_SESSION_LABEL: &str = "general_assistant";

/// Whether `needle` occurs in `haystack` at the start of a word
///
/// Both arguments are expected to be lowercase already.
pub(crate) fn contains_keyword(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |prev| !prev.is_alphanumeric())
    })
}

pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| contains_keyword(haystack, needle))
}

// =============================================================================
// Session Category
// =============================================================================

/// How the backend should treat the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    /// Conversational exchange
    Chat,
    /// Start of a new task
    NewSession,
    /// Follow-up to an existing task
    ContinueSession,
}

impl SessionCategory {
    /// Wire name (`chat`, `new_session`, `continue_session`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::NewSession => "new_session",
            Self::ContinueSession => "continue_session",
        }
    }

    /// Parse a caller-supplied `session_type`
    ///
    /// `task` is accepted as an alias of `new_session`. Returns `None` for
    /// anything else.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "new_session" | "task" => Some(Self::NewSession),
            "continue_session" => Some(Self::ContinueSession),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a message into a session category
///
/// A forced category wins outright.
#[must_use]
pub fn classify(message: &str, forced: Option<SessionCategory>) -> SessionCategory {
    if let Some(category) = forced {
        return category;
    }

    let lower = message.to_lowercase();
    if contains_any(&lower, CHAT_KEYWORDS) {
        SessionCategory::Chat
    } else if contains_any(&lower, NEW_SESSION_KEYWORDS) {
        SessionCategory::NewSession
    } else if contains_any(&lower, CONTINUE_KEYWORDS) {
        SessionCategory::ContinueSession
    } else {
        SessionCategory::Chat
    }
}

/// Derive the clock-independent session label for a message
#[must_use]
pub fn name(message: &str, category: SessionCategory) -> String {
    if category == SessionCategory::Chat {
        return CHAT_SESSION_NAME.to_string();
    }

    let lower = message.to_lowercase();
    NAME_LABELS
        .iter()
        .find(|(keywords, _)| contains_any(&lower, keywords))
        .map_or(DEFAULT_SESSION_LABEL, |(_, label)| *label)
        .to_string()
}

// =============================================================================
// Session Descriptor
// =============================================================================

/// Per-request session identity, never persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionDescriptor {
    /// Name sent to the backend as `session_id`
    pub name: String,
    /// Category after classification and refinement
    pub category: SessionCategory,
    /// When the descriptor was created
    pub created_at: DateTime<Utc>,
}

impl SessionDescriptor {
    /// Build a descriptor for a request
    ///
    /// A non-blank `requested_name` is used verbatim (trimmed). Otherwise the
    /// label from [`name`] is used, suffixed with `_<unix seconds>` when
    /// `timestamped` is set. Two derived names within the same second collide.
    #[must_use]
    pub fn derive(
        message: &str,
        category: SessionCategory,
        requested_name: Option<&str>,
        timestamped: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let session_name = match requested_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(requested) => requested.to_string(),
            None => {
                let label = name(message, category);
                if timestamped {
                    format!("{label}_{}", now.timestamp())
                } else {
                    label
                }
            }
        };

        Self {
            name: session_name,
            category,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_forced_type_wins() {
        assert_eq!(
            classify("привіт", Some(SessionCategory::ContinueSession)),
            SessionCategory::ContinueSession
        );
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(classify("Привіт! Відкрий браузер", None), SessionCategory::Chat);
        assert_eq!(classify("Відкрий браузер", None), SessionCategory::NewSession);
        assert_eq!(classify("А тепер додай субтитри", None), SessionCategory::ContinueSession);
        assert_eq!(classify("сьогодні сонячно", None), SessionCategory::Chat);
    }

    #[test]
    fn test_english_keywords() {
        assert_eq!(classify("Hello there", None), SessionCategory::Chat);
        assert_eq!(classify("Create a project skeleton", None), SessionCategory::NewSession);
        assert_eq!(classify("Also change the colour", None), SessionCategory::ContinueSession);
    }

    #[test]
    fn test_keywords_match_word_starts_only() {
        // "hi" inside "this" must not count as a greeting
        assert_eq!(classify("this needs a fix", None), SessionCategory::Chat);
        assert!(!contains_keyword("this", "hi"));
        assert!(contains_keyword("створити файл", "створи"));
        assert!(contains_keyword("ok, hi!", "hi"));
    }

    #[test]
    fn test_name_labels() {
        assert_eq!(name("відкрий відео", SessionCategory::NewSession), "video_browser");
        assert_eq!(name("довільний текст", SessionCategory::Chat), "general_chat");
        assert_eq!(name("увімкни музику", SessionCategory::NewSession), "music_player");
        assert_eq!(name("відкрий файл звіту", SessionCategory::NewSession), "document_editor");
        assert_eq!(name("запусти калькулятор", SessionCategory::NewSession), "calculator");
        assert_eq!(name("покажи статус", SessionCategory::ContinueSession), "system_monitor");
        assert_eq!(name("зроби щось", SessionCategory::NewSession), "general_assistant");
    }

    #[test]
    fn test_parse_session_type() {
        assert_eq!(SessionCategory::parse("task"), Some(SessionCategory::NewSession));
        assert_eq!(SessionCategory::parse(" CHAT "), Some(SessionCategory::Chat));
        assert_eq!(
            SessionCategory::parse("continue_session"),
            Some(SessionCategory::ContinueSession)
        );
        assert_eq!(SessionCategory::parse("meeting"), None);
    }

    #[test]
    fn test_descriptor_timestamped_name() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let descriptor =
            SessionDescriptor::derive("відкрий відео", SessionCategory::NewSession, None, true, now);
        assert_eq!(descriptor.name, "video_browser_1700000000");
        assert_eq!(descriptor.created_at, now);
    }

    #[test]
    fn test_descriptor_caller_name_verbatim() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let descriptor = SessionDescriptor::derive(
            "відкрий відео",
            SessionCategory::NewSession,
            Some("my-session"),
            true,
            now,
        );
        assert_eq!(descriptor.name, "my-session");

        let blank =
            SessionDescriptor::derive("hi", SessionCategory::Chat, Some("   "), false, now);
        assert_eq!(blank.name, "general_chat");
    }

    #[test]
    fn test_category_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionCategory::ContinueSession).unwrap(),
            "\"continue_session\""
        );
    }

    #[test]
    fn test_descriptor_serializes_with_rfc3339_timestamp() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let descriptor =
            SessionDescriptor::derive("hi", SessionCategory::Chat, Some("s-1"), false, now);
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            serde_json::json!({
                "name": "s-1",
                "category": "chat",
                "created_at": "2023-11-14T22:13:20Z",
            })
        );
    }
}
