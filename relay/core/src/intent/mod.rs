//! Intent Classifier
//!
//! Decides whether a message is conversation (`chat`) or a request to do
//! something (`task`).
//!
//! # Design
//!
//! The LLM path is optional. When it is unconfigured, times out, or returns
//! anything other than a clean `{"intent": ...}` object, the keyword
//! heuristic answers instead. [`IntentClassifier::classify`] therefore has no
//! error type: classification degrades, it never fails.

pub mod client;
pub mod heuristic;

use serde::{Deserialize, Serialize};

use crate::config::IntentSettings;
pub use client::{IntentError, LlmIntentClient};

/// Coarse intent of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Conversation
    Chat,
    /// A request to perform an action
    Task,
}

impl Intent {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Task => "task",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced an intent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentSource {
    /// The LLM classifier answered
    Llm,
    /// The keyword heuristic answered
    Heuristic,
}

/// LLM-first classifier with heuristic fallback
#[derive(Clone, Debug, Default)]
pub struct IntentClassifier {
    llm: Option<LlmIntentClient>,
}

impl IntentClassifier {
    /// Build from settings; the LLM path is enabled only with a base URL
    #[must_use]
    pub fn new(settings: &IntentSettings) -> Self {
        Self {
            llm: LlmIntentClient::from_settings(settings),
        }
    }

    /// Heuristic-only classifier
    #[must_use]
    pub fn heuristic_only() -> Self {
        Self { llm: None }
    }

    /// Whether the LLM path is configured
    #[must_use]
    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Classify text; at most one outbound call, never an error
    pub async fn classify(&self, text: &str) -> (Intent, IntentSource) {
        if let Some(ref llm) = self.llm {
            match llm.classify(text).await {
                Ok(intent) => return (intent, IntentSource::Llm),
                Err(e) => {
                    tracing::debug!(error = %e, "Intent classifier degraded to heuristic");
                }
            }
        }
        (heuristic::classify(text), IntentSource::Heuristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unconfigured_uses_heuristic() {
        let classifier = IntentClassifier::new(&IntentSettings::default());
        assert!(!classifier.has_llm());

        assert_eq!(
            classifier.classify("Привіт, як справи?").await,
            (Intent::Chat, IntentSource::Heuristic)
        );
        assert_eq!(
            classifier.classify("Створи файл і налаштуй сервіс").await,
            (Intent::Task, IntentSource::Heuristic)
        );
    }

    #[tokio::test]
    async fn test_llm_answer_is_used() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"{\"intent\":\"task\"}"}}]}"#)
            .create_async()
            .await;

        let classifier = IntentClassifier::new(&IntentSettings {
            base_url: Some(server.url()),
            ..IntentSettings::default()
        });

        // heuristic would say chat for a greeting; the model wins
        assert_eq!(
            classifier.classify("привіт").await,
            (Intent::Task, IntentSource::Llm)
        );
    }

    #[tokio::test]
    async fn test_malformed_llm_body_falls_back() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("definitely not json")
            .create_async()
            .await;

        let classifier = IntentClassifier::new(&IntentSettings {
            base_url: Some(server.url()),
            ..IntentSettings::default()
        });

        assert_eq!(
            classifier.classify("Створи файл").await,
            (Intent::Task, IntentSource::Heuristic)
        );
    }

    #[tokio::test]
    async fn test_unreachable_llm_falls_back() {
        // Port 9 (discard) on localhost is almost never listening
        let classifier = IntentClassifier::new(&IntentSettings {
            base_url: Some("http://127.0.0.1:9".to_string()),
            timeout: Duration::from_millis(200),
            ..IntentSettings::default()
        });

        assert_eq!(
            classifier.classify("дякую").await,
            (Intent::Chat, IntentSource::Heuristic)
        );
    }

    #[test]
    fn test_intent_wire_names() {
        assert_eq!(serde_json::to_string(&Intent::Task).unwrap(), "\"task\"");
        assert_eq!(
            serde_json::to_string(&IntentSource::Heuristic).unwrap(),
            "\"heuristic\""
        );
    }
}
