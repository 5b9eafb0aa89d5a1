//! Request and Envelope Types
//!
//! [`ChatRequest`] is the inbound body of `POST /api/chat/stream`.
//! [`RelayEnvelope`] is the body sent to the execution backend.
//!
//! # Inbound Aliases
//!
//! - `prompt` is accepted when `message` is missing or blank
//! - `no_paraphrase` is accepted for `suppress_paraphrase`; both take a JSON
//!   bool or one of the strings `1/true/yes/on`

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::parse_flag;
use crate::session::SessionCategory;

// =============================================================================
// Inbound Request
// =============================================================================

/// Why a chat request was rejected before streaming
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidRequest {
    /// Neither `message` nor `prompt` carried non-blank text
    #[error("Message is required")]
    EmptyMessage,

    /// `session_type` was not one of the known categories
    #[error("Unknown session_type '{0}' (expected chat, new_session or continue_session)")]
    UnknownSessionType(String),
}

/// Inbound chat request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User message
    #[serde(default)]
    pub message: Option<String>,

    /// Alternate spelling of `message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Caller-chosen session name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Forced session category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,

    /// Skip the paraphraser for this request
    #[serde(default, alias = "no_paraphrase", deserialize_with = "flexible_bool")]
    pub suppress_paraphrase: bool,
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => parse_flag(&s).unwrap_or(false),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    })
}

impl ChatRequest {
    /// Request with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the session name
    #[must_use]
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    /// Set the forced session type
    #[must_use]
    pub fn with_session_type(mut self, session_type: impl Into<String>) -> Self {
        self.session_type = Some(session_type.into());
        self
    }

    /// Set paraphrase suppression
    #[must_use]
    pub fn with_suppress_paraphrase(mut self, suppress: bool) -> Self {
        self.suppress_paraphrase = suppress;
        self
    }

    /// First non-blank of `message` and `prompt`, trimmed
    #[must_use]
    pub fn resolve_message(&self) -> Option<&str> {
        [self.message.as_deref(), self.prompt.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|m| !m.is_empty())
    }

    /// Check the request and normalize its fields
    ///
    /// # Errors
    ///
    /// [`InvalidRequest::EmptyMessage`] for a missing or whitespace-only
    /// message, [`InvalidRequest::UnknownSessionType`] for an unrecognized
    /// non-blank `session_type`.
    pub fn validate(&self) -> Result<ValidatedRequest, InvalidRequest> {
        let message = self
            .resolve_message()
            .ok_or(InvalidRequest::EmptyMessage)?
            .to_string();

        let forced_category = match self.session_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                SessionCategory::parse(raw)
                    .ok_or_else(|| InvalidRequest::UnknownSessionType(raw.to_string()))?,
            ),
        };

        Ok(ValidatedRequest {
            message,
            session_name: self
                .session_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
            forced_category,
            suppress_paraphrase: self.suppress_paraphrase,
        })
    }
}

/// A request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Non-blank trimmed message
    pub message: String,
    /// Caller-chosen session name, if any
    pub session_name: Option<String>,
    /// Forced category, if any
    pub forced_category: Option<SessionCategory>,
    /// Paraphrase suppressed by the caller
    pub suppress_paraphrase: bool,
}

// =============================================================================
// Outbound Envelope
// =============================================================================

/// One content part of an envelope message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Always `text` for relayed messages
    #[serde(rename = "type")]
    pub kind: String,
    /// The text
    pub text: String,
}

/// One message in the envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    /// Always `user` for relayed messages
    pub role: String,
    /// Unix seconds
    pub created: i64,
    /// Content parts
    pub content: Vec<ContentItem>,
}

/// Body posted to the execution backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Conversation messages (a single user message)
    pub messages: Vec<EnvelopeMessage>,
    /// Session name
    pub session_id: String,
    /// Working directory the backend should operate in
    pub session_working_dir: String,
}

impl RelayEnvelope {
    /// Envelope carrying one user text message
    pub fn user_text(
        text: impl Into<String>,
        session_id: impl Into<String>,
        working_dir: &Path,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            messages: vec![EnvelopeMessage {
                role: "user".to_string(),
                created: created.timestamp(),
                content: vec![ContentItem {
                    kind: "text".to_string(),
                    text: text.into(),
                }],
            }],
            session_id: session_id.into(),
            session_working_dir: working_dir.to_string_lossy().into_owned(),
        }
    }

    /// Text of the first content item of the first message
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.messages
            .first()
            .and_then(|m| m.content.first())
            .map(|c| c.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: Value) -> ChatRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_message_wins_over_prompt() {
        let req = parse(json!({"message": "a", "prompt": "b"}));
        assert_eq!(req.resolve_message(), Some("a"));
    }

    #[test]
    fn test_prompt_alias() {
        let req = parse(json!({"prompt": "  open video  "}));
        assert_eq!(req.resolve_message(), Some("open video"));

        let blank_message = parse(json!({"message": "   ", "prompt": "b"}));
        assert_eq!(blank_message.resolve_message(), Some("b"));
    }

    #[test]
    fn test_empty_and_whitespace_rejected() {
        assert_eq!(
            parse(json!({"message": ""})).validate(),
            Err(InvalidRequest::EmptyMessage)
        );
        assert_eq!(
            parse(json!({"message": " \n\t"})).validate(),
            Err(InvalidRequest::EmptyMessage)
        );
        assert_eq!(parse(json!({})).validate(), Err(InvalidRequest::EmptyMessage));
    }

    #[test]
    fn test_session_type_parsing() {
        let ok = parse(json!({"message": "x", "session_type": "task"}))
            .validate()
            .unwrap();
        assert_eq!(ok.forced_category, Some(SessionCategory::NewSession));

        let blank = parse(json!({"message": "x", "session_type": ""}))
            .validate()
            .unwrap();
        assert_eq!(blank.forced_category, None);

        assert_eq!(
            parse(json!({"message": "x", "session_type": "party"})).validate(),
            Err(InvalidRequest::UnknownSessionType("party".to_string()))
        );
    }

    #[test]
    fn test_suppress_paraphrase_spellings() {
        for body in [
            json!({"message": "x", "suppress_paraphrase": true}),
            json!({"message": "x", "no_paraphrase": "yes"}),
            json!({"message": "x", "no_paraphrase": "1"}),
            json!({"message": "x", "no_paraphrase": 1}),
        ] {
            assert!(parse(body.clone()).suppress_paraphrase, "body {body}");
        }
        assert!(!parse(json!({"message": "x", "no_paraphrase": "nah"})).suppress_paraphrase);
        assert!(!parse(json!({"message": "x"})).suppress_paraphrase);
    }

    #[test]
    fn test_blank_session_name_dropped() {
        let v = ChatRequest::new("x").with_session_name("  ").validate().unwrap();
        assert_eq!(v.session_name, None);
    }

    #[test]
    fn test_envelope_shape() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let envelope =
            RelayEnvelope::user_text("Open the report.", "s1", Path::new("/work"), created);

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "messages": [{
                    "role": "user",
                    "created": 1_700_000_000,
                    "content": [{"type": "text", "text": "Open the report."}],
                }],
                "session_id": "s1",
                "session_working_dir": "/work",
            })
        );
        assert_eq!(envelope.text(), Some("Open the report."));
    }
}
