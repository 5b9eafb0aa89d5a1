//! OpenAI-compatible intent client
//!
//! Sends one non-streaming `POST {base}/chat/completions` per classification
//! and reads `choices[0].message.content`. No retries.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::Intent;
use crate::config::IntentSettings;

/// System prompt for the classifier model
pub const INTENT_SYSTEM_PROMPT: &str = "Ти — РОУТЕР НАМІРІВ. Лише КЛАСИФІКУЄШ намір користувача без виконання.\n\
Поверни РІВНО один JSON-об’єкт БЕЗ будь-якого оточуючого тексту.\n\
Поле intent ∈ {\"chat\", \"task\"}.\n\
chat — коли користувач просто спілкується/бесідує, без просьби щось виконати.\n\
task — коли користувач просить ВИКОНАТИ завдання/дію/інструкцію/розробку тощо.\n\
Формат: {\"intent\": \"chat|task\"}";

/// Why an LLM classification did not produce an intent
#[derive(Debug, Error)]
pub enum IntentError {
    /// The request did not complete within the configured timeout
    #[error("intent classifier timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or protocol failure
    #[error("intent classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-200 response
    #[error("intent classifier returned HTTP {0}")]
    Status(u16),

    /// Body without a usable `choices[0].message.content`
    #[error("intent classifier response had no content")]
    MissingContent,

    /// Content was not a JSON object with a recognized `intent`
    #[error("intent classifier returned unrecognized content: {0}")]
    Unrecognized(String),
}

/// Client for an OpenAI-compatible chat completions endpoint
#[derive(Clone, Debug)]
pub struct LlmIntentClient {
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl LlmIntentClient {
    /// Create a client; returns `None` if no base URL is configured
    #[must_use]
    pub fn from_settings(settings: &IntentSettings) -> Option<Self> {
        let base_url = settings.base_url.as_ref()?.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return None;
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Some(Self {
            base_url,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout,
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Ask the model for an intent, bounded by the configured timeout
    ///
    /// # Errors
    ///
    /// Any timeout, transport failure, non-200 status or unusable body.
    pub async fn classify(&self, text: &str) -> Result<Intent, IntentError> {
        tokio::time::timeout(self.timeout, self.request(text))
            .await
            .map_err(|_| IntentError::Timeout(self.timeout))?
    }

    async fn request(&self, text: &str) -> Result<Intent, IntentError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": INTENT_SYSTEM_PROMPT},
                {"role": "user", "content": text},
            ],
            "stream": false,
        });

        let mut request = self.http_client.post(self.completions_url()).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(IntentError::Status(response.status().as_u16()));
        }

        let data: Value = response.json().await?;
        let content = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(IntentError::MissingContent)?;

        parse_intent_content(content)
    }
}

/// Parse the model's reply into an intent
///
/// Tolerates Markdown code fences (with or without a `json` tag) and text
/// around the JSON object.
///
/// # Errors
///
/// Returns [`IntentError::Unrecognized`] if no object with an `intent` of
/// `chat` or `task` can be found.
pub fn parse_intent_content(content: &str) -> Result<Intent, IntentError> {
    let unrecognized = || IntentError::Unrecognized(content.chars().take(120).collect());

    let mut s = content.trim();
    if s.starts_with("```") {
        s = s.trim_matches('`').trim();
        if s.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            s = s[4..].trim();
        }
    }

    let start = s.find('{').ok_or_else(unrecognized)?;
    let end = s.rfind('}').ok_or_else(unrecognized)?;
    if end < start {
        return Err(unrecognized());
    }

    let value: Value = serde_json::from_str(&s[start..=end]).map_err(|_| unrecognized())?;
    match value
        .get("intent")
        .and_then(Value::as_str)
        .map(|i| i.trim().to_lowercase())
        .as_deref()
    {
        Some("chat") => Ok(Intent::Chat),
        Some("task") => Ok(Intent::Task),
        _ => Err(unrecognized()),
    }
}
