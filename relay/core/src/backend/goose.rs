//! Goose Backend Implementation
//!
//! Streams replies from the Goose execution backend over SSE.
//!
//! # Goose API
//!
//! - `GET /api/health` - only answered (200) by the web server
//! - `POST /api/chat/reply` - streaming reply, web dialect
//! - `POST /reply` - streaming reply, daemon dialect
//!
//! Both reply endpoints take the same [`RelayEnvelope`] and answer with
//! `text/event-stream`.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL};

use super::traits::{BackendError, BackendStream, Dialect, ExecutionBackend, MAX_ERROR_BODY_CHARS};
use crate::config::{BackendSettings, DialectSetting};
use crate::messages::RelayEnvelope;

/// Keep the io kind buried in a reqwest error so peer closes stay recognizable
fn convert_err(err: reqwest::Error) -> io::Error {
    let kind = io_kind_in_chain(&err).unwrap_or(io::ErrorKind::Other);
    io::Error::new(kind, err)
}

fn io_kind_in_chain(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

/// Read at most enough of an error body for [`MAX_ERROR_BODY_CHARS`]
///
/// Stops at the byte cap or the end of the body. A stalled read is cut at
/// `idle_timeout`, keeping whatever arrived.
async fn read_error_body(response: reqwest::Response, idle_timeout: Option<Duration>) -> String {
    // four bytes covers the widest UTF-8 char
    let cap = MAX_ERROR_BODY_CHARS * 4;
    let mut body = Vec::new();
    let mut chunks = Box::pin(response.bytes_stream());

    let read = async {
        while let Some(Ok(chunk)) = chunks.next().await {
            body.extend_from_slice(&chunk);
            if body.len() >= cap {
                break;
            }
        }
    };

    match idle_timeout {
        Some(limit) => {
            if tokio::time::timeout(limit, read).await.is_err() {
                tracing::debug!(?limit, "Backend error body stalled, keeping what arrived");
            }
        }
        None => read.await,
    }

    String::from_utf8_lossy(&body).into_owned()
}

/// Goose backend client
#[derive(Clone, Debug)]
pub struct GooseBackend {
    settings: BackendSettings,
    http_client: reqwest::Client,
}

impl GooseBackend {
    /// Create a new Goose backend
    #[must_use]
    pub fn new(settings: BackendSettings) -> Self {
        // No overall request timeout: replies stream for minutes. Idle and
        // total limits are enforced by the stream translator.
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.probe_timeout.max(Duration::from_secs(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            settings,
            http_client,
        }
    }

    /// Configured settings
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn health_url(&self) -> String {
        format!("{}/api/health", self.settings.base_url)
    }

    fn reply_url(&self, dialect: Dialect) -> String {
        format!("{}{}", self.settings.base_url, dialect.reply_path())
    }

    /// Resolve the dialect for one relay connection
    pub async fn detect_dialect(&self) -> Dialect {
        match self.settings.dialect {
            DialectSetting::Web => Dialect::Web,
            DialectSetting::Daemon => Dialect::Daemon,
            DialectSetting::Auto => self.probe().await,
        }
    }

    /// `GET /api/health`: 200 means web, anything else means daemon
    async fn probe(&self) -> Dialect {
        let result = self
            .http_client
            .get(self.health_url())
            .timeout(self.settings.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => Dialect::Web,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Health probe not OK, using daemon dialect");
                Dialect::Daemon
            }
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed, using daemon dialect");
                Dialect::Daemon
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        match HeaderValue::from_str(&self.settings.secret_key) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert("x-secret-key", value);
            }
            Err(_) => tracing::warn!("Backend secret contains invalid header characters, not sent"),
        }

        if !self.settings.secret_key.is_empty() {
            if let Ok(mut value) =
                HeaderValue::from_str(&format!("Bearer {}", self.settings.secret_key))
            {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }
}

#[async_trait]
impl ExecutionBackend for GooseBackend {
    fn name(&self) -> &str {
        "Goose"
    }

    fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    async fn health_check(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        self.http_client
            .get(&self.settings.base_url)
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .is_ok()
    }

    async fn open_stream(&self, envelope: &RelayEnvelope) -> Result<BackendStream, BackendError> {
        if !self.is_configured() {
            return Err(BackendError::NotConfigured);
        }

        let dialect = self.detect_dialect().await;
        let url = self.reply_url(dialect);
        tracing::debug!(%url, %dialect, session = %envelope.session_id, "Opening backend stream");

        let request = self
            .http_client
            .post(&url)
            .headers(self.headers())
            .json(envelope)
            .send();

        let response = match self.settings.stream_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => request.await,
        }
        .map_err(|e| BackendError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response, self.settings.stream_timeout).await;
            tracing::warn!(status = status.as_u16(), %dialect, "Backend rejected relay request");
            return Err(BackendError::status(status.as_u16(), &body));
        }

        Ok(Box::pin(response.bytes_stream().map_err(convert_err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockito::Matcher;
    use std::path::Path;

    fn settings(base_url: &str, dialect: DialectSetting, secret: &str) -> BackendSettings {
        BackendSettings {
            base_url: base_url.to_string(),
            secret_key: secret.to_string(),
            dialect,
            probe_timeout: Duration::from_millis(500),
            stream_timeout: Some(Duration::from_secs(5)),
            ..BackendSettings::default()
        }
    }

    fn envelope() -> RelayEnvelope {
        RelayEnvelope::user_text("Open the report.", "s1", Path::new("/work"), Utc::now())
    }

    async fn collect_body(mut stream: BackendStream) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_headers_without_secret() {
        let backend = GooseBackend::new(settings("http://x", DialectSetting::Daemon, ""));
        let headers = backend.headers();
        assert_eq!(headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get("x-secret-key").unwrap(), "");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_headers_with_secret() {
        let backend = GooseBackend::new(settings("http://x", DialectSetting::Daemon, "s3"));
        let headers = backend.headers();
        assert_eq!(headers.get("x-secret-key").unwrap(), "s3");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer s3");
    }

    #[test]
    fn test_io_kind_found_through_wrappers() {
        let inner = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let outer = io::Error::new(io::ErrorKind::Other, inner);
        // outermost io::Error wins
        assert_eq!(io_kind_in_chain(&outer), Some(io::ErrorKind::Other));

        let fmt_err = std::fmt::Error;
        assert_eq!(io_kind_in_chain(&fmt_err), None);
    }

    #[tokio::test]
    async fn test_probe_picks_web_on_health_200() {
        let mut server = mockito::Server::new_async().await;
        let _health = server
            .mock("GET", "/api/health")
            .with_status(200)
            .create_async()
            .await;

        let backend = GooseBackend::new(settings(&server.url(), DialectSetting::Auto, ""));
        assert_eq!(backend.detect_dialect().await, Dialect::Web);
    }

    #[tokio::test]
    async fn test_probe_picks_daemon_otherwise() {
        let mut server = mockito::Server::new_async().await;
        let _health = server
            .mock("GET", "/api/health")
            .with_status(404)
            .create_async()
            .await;

        let backend = GooseBackend::new(settings(&server.url(), DialectSetting::Auto, ""));
        assert_eq!(backend.detect_dialect().await, Dialect::Daemon);
    }

    #[tokio::test]
    async fn test_forced_dialect_skips_probe() {
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/api/health")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let backend = GooseBackend::new(settings(&server.url(), DialectSetting::Daemon, ""));
        assert_eq!(backend.detect_dialect().await, Dialect::Daemon);
        health.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_stream_web_dialect() {
        let mut server = mockito::Server::new_async().await;
        let _health = server
            .mock("GET", "/api/health")
            .with_status(200)
            .create_async()
            .await;
        let reply = server
            .mock("POST", "/api/chat/reply")
            .match_header("accept", "text/event-stream")
            .match_header("x-secret-key", "k")
            .match_header("authorization", "Bearer k")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({
                    "session_id": "s1",
                    "session_working_dir": "/work",
                })),
                Matcher::Regex(r#""role":"user""#.to_string()),
                Matcher::Regex(r#""text":"Open the report\.""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"text\":\"hi\"}\n\n")
            .create_async()
            .await;

        let backend = GooseBackend::new(settings(&server.url(), DialectSetting::Auto, "k"));
        let stream = backend.open_stream(&envelope()).await.unwrap();

        assert_eq!(collect_body(stream).await, "data: {\"text\":\"hi\"}\n\n");
        reply.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_stream_non_2xx_carries_truncated_body() {
        let mut server = mockito::Server::new_async().await;
        let _reply = server
            .mock("POST", "/reply")
            .with_status(502)
            .with_body("x".repeat(800))
            .create_async()
            .await;

        let backend = GooseBackend::new(settings(&server.url(), DialectSetting::Daemon, ""));
        match backend.open_stream(&envelope()).await {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), 500);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_open_stream_not_configured() {
        let backend = GooseBackend::new(settings("", DialectSetting::Daemon, ""));
        assert!(!backend.is_configured());
        assert!(!backend.health_check().await);
        assert!(matches!(
            backend.open_stream(&envelope()).await,
            Err(BackendError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_open_stream_connection_refused() {
        let backend = GooseBackend::new(settings(
            "http://127.0.0.1:9",
            DialectSetting::Daemon,
            "",
        ));
        assert!(matches!(
            backend.open_stream(&envelope()).await,
            Err(BackendError::Connect(_) | BackendError::Timeout(_))
        ));
    }
}
