//! Canonical Events
//!
//! The gateway's normalized view of a relayed conversation, independent of
//! which backend dialect produced it. Every client-visible stream is a
//! sequence of zero or more `Status`/`Token` events followed by exactly one
//! terminal `Done` or `Error`.
//!
//! # Wire Format
//!
//! Events serialize as flat JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"status","message":"connected","session":"video_browser_1700000000", ...}
//! {"type":"token","token":"Hel","accumulated":"Hel"}
//! {"type":"done","total":"Hello"}
//! {"type":"error","message":"backend returned HTTP 502","detail":"bad gateway"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized event relayed to the client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanonicalEvent {
    /// Progress / bookkeeping information (connection, mode, paraphrase)
    Status {
        /// Short machine-readable status name
        message: String,
        /// Session the relay is bound to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        /// Additional status-specific fields
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// One token of backend output
    Token {
        /// The token text as received
        token: String,
        /// Concatenation of every token so far, this one included
        accumulated: String,
    },

    /// The stream completed
    Done {
        /// The full transcript (possibly empty)
        total: String,
    },

    /// The stream failed
    Error {
        /// Human-readable description
        message: String,
        /// Backend detail (e.g. truncated response body)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Transcript accumulated before the fault
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial: Option<String>,
    },
}

impl CanonicalEvent {
    /// Create a bare status event
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            session: None,
            extra: Map::new(),
        }
    }

    /// Attach the session name to a status event (no-op for other kinds)
    #[must_use]
    pub fn with_session(mut self, name: impl Into<String>) -> Self {
        if let Self::Status { session, .. } = &mut self {
            *session = Some(name.into());
        }
        self
    }

    /// Attach an extra field to a status event (no-op for other kinds)
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Status { extra, .. } = &mut self {
            extra.insert(key.into(), value.into());
        }
        self
    }

    /// Create an error event without detail or partial transcript
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            detail: None,
            partial: None,
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// The wire `type` tag
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Token { .. } => "token",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
