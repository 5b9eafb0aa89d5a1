//! Execution Backend Traits
//!
//! The relay talks to the execution backend only through
//! [`ExecutionBackend`], so the orchestrator can be driven by scripted
//! streams in tests and by [`super::GooseBackend`] in production.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::messages::RelayEnvelope;

/// Longest backend error body carried in a [`BackendError::Status`]
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Raw response body of a relay connection
///
/// Errors keep the underlying [`io::ErrorKind`] so the translator can tell a
/// peer close (clean end) from a real fault.
pub type BackendStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Wire dialect of the execution backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Web UI server: `POST /api/chat/reply`
    Web,
    /// Headless daemon: `POST /reply`
    Daemon,
}

impl Dialect {
    /// Path of the streaming reply endpoint
    #[must_use]
    pub fn reply_path(self) -> &'static str {
        match self {
            Self::Web => "/api/chat/reply",
            Self::Daemon => "/reply",
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Daemon => "daemon",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to open a relay connection
#[derive(Debug, Error)]
pub enum BackendError {
    /// No base URL configured
    #[error("execution backend is not configured")]
    NotConfigured,

    /// Non-2xx response
    #[error("backend returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated to [`MAX_ERROR_BODY_CHARS`]
        body: String,
    },

    /// Connection failed before any byte was read
    #[error("backend connection failed: {0}")]
    Connect(String),

    /// No response head within the idle timeout
    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Build a status error, truncating the body
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            body: truncate_chars(body, MAX_ERROR_BODY_CHARS),
        }
    }

    /// Extra detail for an in-band error event
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } if !body.is_empty() => Some(body.clone()),
            _ => None,
        }
    }
}

/// First `max` chars of `text`
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Execution backend seam
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name for logs (e.g. "Goose")
    fn name(&self) -> &str;

    /// Whether a base URL is configured at all
    fn is_configured(&self) -> bool;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming reply for the envelope
    ///
    /// Resolves once the response head is in; the body arrives through the
    /// returned stream.
    async fn open_stream(&self, envelope: &RelayEnvelope) -> Result<BackendStream, BackendError>;
}
