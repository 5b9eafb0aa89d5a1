//! Backend Line Decoding
//!
//! Turns raw backend body bytes into lines, and each line into one
//! [`BackendFrame`]. All knowledge of the backend's heterogeneous JSON
//! shapes lives in [`decode_line`].
//!
//! # Recognized Shapes
//!
//! ```text
//! data: {"type":"Message","message":{"content":[{"type":"text","text":"Hi"}]}}
//! data: {"text":"Hi"} | {"token":"Hi"} | {"content":"Hi"}
//! data: {"final":true} | {"done":true}
//! data: "Hi"            (non-object JSON is a literal token)
//! data: Hi              (unparseable payload is a literal token)
//! event: done
//! : keep-alive
//! ```

use serde_json::Value;

/// One decoded backend line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendFrame {
    /// Blank line, comment, or an SSE field the relay does not use
    Heartbeat,
    /// Zero or more token texts, optionally marking completion
    Tokens {
        /// Token texts in order
        texts: Vec<String>,
        /// Stream is complete after this line
        done: bool,
    },
    /// Explicit completion marker
    DoneMarker,
    /// Parsed data that carries no text (bookkeeping events, `null`)
    StatusMarker,
    /// Unparseable data payload, relayed as a literal token
    Unrecognized(String),
}

/// Decode one line of the backend stream
#[must_use]
pub fn decode_line(raw: &str) -> BackendFrame {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(':') {
        return BackendFrame::Heartbeat;
    }

    if let Some(payload) = line.strip_prefix("data:") {
        return decode_payload(payload.trim_start());
    }

    if is_done_event(line) {
        return BackendFrame::DoneMarker;
    }

    BackendFrame::Heartbeat
}

fn is_done_event(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower
        .strip_prefix("event:")
        .is_some_and(|name| name.trim() == "done")
}

fn decode_payload(payload: &str) -> BackendFrame {
    if payload.is_empty() {
        return BackendFrame::Heartbeat;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(obj)) => decode_object(&obj),
        Ok(Value::Null) => BackendFrame::StatusMarker,
        Ok(Value::String(s)) => single_token(s, false),
        Ok(other) => single_token(other.to_string(), false),
        Err(_) => BackendFrame::Unrecognized(payload.to_string()),
    }
}

fn decode_object(obj: &serde_json::Map<String, Value>) -> BackendFrame {
    if obj.get("type").and_then(Value::as_str) == Some("Message") {
        if let Some(message) = obj.get("message").and_then(Value::as_object) {
            let texts: Vec<String> = message
                .get("content")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|item| item.get("text").and_then(text_of))
                        .collect()
                })
                .unwrap_or_default();

            return if texts.is_empty() {
                BackendFrame::StatusMarker
            } else {
                BackendFrame::Tokens { texts, done: false }
            };
        }
    }

    let token = ["text", "token", "content"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(text_of));
    let done = [obj.get("final"), obj.get("done")]
        .into_iter()
        .flatten()
        .any(|v| v.as_bool() == Some(true));

    match (token, done) {
        (Some(t), done) => single_token(t, done),
        (None, true) => BackendFrame::DoneMarker,
        (None, false) => BackendFrame::StatusMarker,
    }
}

/// Non-empty string or number as token text
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn single_token(text: String, done: bool) -> BackendFrame {
    if text.is_empty() {
        return if done {
            BackendFrame::DoneMarker
        } else {
            BackendFrame::StatusMarker
        };
    }
    BackendFrame::Tokens {
        texts: vec![text],
        done,
    }
}

// =============================================================================
// Line Buffering
// =============================================================================

/// Longest unterminated line buffered before the stream is faulted
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reassembles lines from arbitrarily chunked body bytes
///
/// Bytes are buffered until a `\n`, so multi-byte UTF-8 sequences split
/// across chunks decode correctly.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    /// Create an empty buffer capped at [`MAX_LINE_BYTES`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with a custom line cap
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Line cap in bytes
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether the pending unterminated line is over the cap
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.buf.len() > self.limit
    }

    /// Append a chunk and drain every complete line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Take the unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}
