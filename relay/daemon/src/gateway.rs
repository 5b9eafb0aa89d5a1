//! SSE Gateway Handlers
//!
//! Per request: `Received → Validating → Streaming → Terminated`.
//!
//! Everything that can fail with an HTTP status happens before the
//! `text/event-stream` headers are committed. After that, problems are
//! in-band `error` events and the status stays 200.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use relay_core::{CanonicalEvent, ChatRequest, Intent, IntentSource, RelayError};

use crate::server::AppState;

// =============================================================================
// Errors
// =============================================================================

/// Failures answered with a status code and a JSON body
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Body is not valid JSON for the endpoint
    #[error("Invalid request body: {0}")]
    MalformedBody(String),

    /// Well-formed body with a missing or bad field
    #[error("{0}")]
    InvalidInput(String),

    /// Relay refused the request before streaming
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl GatewayError {
    /// HTTP status for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedBody(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Relay(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Rejecting request");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Rejecting request");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status_code": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (
            status,
            [(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
            Json(body),
        )
            .into_response()
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::MalformedBody(e.to_string()))
}

// =============================================================================
// Health
// =============================================================================

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.relay.config();
    Json(serde_json::json!({
        "status": "ok",
        "backend": config.backend.base_url,
        "dialect": config.backend.dialect.as_str(),
        "intent_llm": config.intent_llm_enabled(),
    }))
}

// =============================================================================
// Intent
// =============================================================================

/// `POST /api/intent` body
#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    /// Text to classify
    #[serde(default)]
    pub text: String,
}

/// `POST /api/intent` answer
#[derive(Debug, Serialize)]
pub struct IntentResponse {
    /// Classification
    pub intent: Intent,
    /// Which classifier produced it
    pub source: IntentSource,
}

/// `POST /api/intent`
pub async fn intent(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IntentResponse>, GatewayError> {
    let request: IntentRequest = parse_json(&body)?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(GatewayError::InvalidInput("Text is required".to_string()));
    }

    let (intent, source) = state.relay.classifier().classify(text).await;
    Ok(Json(IntentResponse { intent, source }))
}

// =============================================================================
// Chat Stream
// =============================================================================

/// `POST /api/chat/stream`
pub async fn chat_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("chat_stream", %request_id);

    let request: ChatRequest = parse_json(&body)?;

    // a panic while preparing becomes a 500, not a dropped connection
    let relay = state.relay.clone();
    let prepared = tokio::spawn(async move { relay.prepare(&request).await }.instrument(span.clone()))
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))??;

    let rx = span.in_scope(|| state.relay.start(prepared));
    Ok(sse_response(rx))
}

/// Frame relay events as SSE until the terminal event
///
/// If the relay task ends without a terminal event, one `error` frame is
/// synthesized so the client always sees exactly one terminal frame.
pub fn sse_response(mut rx: mpsc::Receiver<CanonicalEvent>) -> Response {
    let frames = async_stream::stream! {
        let mut terminated = false;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield Ok::<_, Infallible>(to_sse_event(&event));
            if terminal {
                terminated = true;
                break;
            }
        }
        if !terminated {
            tracing::warn!("Relay ended without a terminal event");
            yield Ok(to_sse_event(&CanonicalEvent::error("relay ended unexpectedly")));
        }
    };

    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn to_sse_event(event: &CanonicalEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, kind = event.kind(), "Failed to encode event");
        Event::default().data(r#"{"type":"error","message":"failed to encode event"}"#)
    })
}
