//! Relay Orchestrator
//!
//! One [`Relay`] is built at startup and shared by every request. Each
//! request goes through two phases:
//!
//! 1. [`Relay::prepare`]: validation, session naming, intent, paraphrase.
//!    Failures here are [`RelayError`]s and map to HTTP status codes because
//!    no response headers have been sent yet.
//! 2. [`Relay::start`]: spawns the relay task and returns the event
//!    receiver. From here on every problem is an in-band `Error` event.
//!
//! # Request Flow
//!
//! ```text
//! ChatRequest ──validate──▶ ValidatedRequest
//!      │
//!      ├─ forced type? ── yes ─▶ category = forced (no classification)
//!      │        └──────── no ──▶ namer category, refined by intent:
//!      │                          chat + task ⇒ new_session
//!      ▼
//! SessionDescriptor ─▶ paraphrase? ─▶ RelayEnvelope ─▶ PreparedRelay
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::backend::{ExecutionBackend, GooseBackend};
use crate::config::RelayConfig;
use crate::events::CanonicalEvent;
use crate::intent::{Intent, IntentClassifier, IntentSource};
use crate::messages::{ChatRequest, InvalidRequest, RelayEnvelope};
use crate::paraphrase::{DirectiveParaphraser, TemplateParaphraser};
use crate::session::{self, SessionCategory, SessionDescriptor};
use crate::streaming::{self, StreamOutcome, StreamTranslator};

/// Events buffered between the relay task and the client writer
///
/// One slot: the relay never runs more than one event ahead of the client.
pub const RELAY_CHANNEL_CAPACITY: usize = 1;

// =============================================================================
// Error Types
// =============================================================================

/// Failures before the event stream is committed
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or empty request
    #[error(transparent)]
    Validation(#[from] InvalidRequest),

    /// Required infrastructure is not available
    #[error("{0}")]
    Unavailable(String),

    /// Unexpected internal fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status code for the pre-stream error response
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }
}

// =============================================================================
// Prepared Relay
// =============================================================================

/// Every per-request decision, made before any header is sent
#[derive(Clone, Debug)]
pub struct PreparedRelay {
    /// Session identity
    pub session: SessionDescriptor,
    /// Intent and its source; `None` when the caller forced the type
    pub intent: Option<(Intent, IntentSource)>,
    /// Whether the paraphraser was applied
    pub paraphrased: bool,
    /// The user's message as received (trimmed)
    pub original: String,
    /// Body for the execution backend
    pub envelope: RelayEnvelope,
}

impl PreparedRelay {
    /// Text actually dispatched to the backend
    #[must_use]
    pub fn dispatched(&self) -> &str {
        self.envelope.text().unwrap_or(&self.original)
    }

    /// Status events announced before the backend stream
    #[must_use]
    pub fn status_events(&self) -> Vec<CanonicalEvent> {
        let intent = self
            .intent
            .map_or(serde_json::Value::Null, |(i, _)| i.as_str().into());

        let mut events = vec![CanonicalEvent::status("connected")
            .with_session(self.session.name.clone())
            .with_field("category", self.session.category.as_str())
            .with_field("intent", intent)
            .with_field("paraphrase", self.paraphrased)
            .with_field("dispatched", self.dispatched())];

        if self.session.category == SessionCategory::Chat {
            events.push(CanonicalEvent::status("mode_detected").with_field("mode", "chat"));
        }

        if self.paraphrased && self.dispatched() != self.original {
            events.push(CanonicalEvent::status("paraphrase").with_field("content", self.dispatched()));
        }

        events
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Shared per-process relay
#[derive(Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    backend: Arc<dyn ExecutionBackend>,
    classifier: Arc<IntentClassifier>,
    paraphraser: Arc<dyn DirectiveParaphraser>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("backend", &self.backend.name())
            .field("intent_llm", &self.classifier.has_llm())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Build the production relay: Goose backend, configured classifier,
    /// template paraphraser
    #[must_use]
    pub fn new(config: Arc<RelayConfig>) -> Self {
        let backend = Arc::new(GooseBackend::new(config.backend.clone()));
        let classifier = Arc::new(IntentClassifier::new(&config.intent));
        Self {
            config,
            backend,
            classifier,
            paraphraser: Arc::new(TemplateParaphraser::new()),
        }
    }

    /// Replace the execution backend
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the intent classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Replace the paraphraser
    #[must_use]
    pub fn with_paraphraser(mut self, paraphraser: Arc<dyn DirectiveParaphraser>) -> Self {
        self.paraphraser = paraphraser;
        self
    }

    /// Process-wide configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Intent classifier
    #[must_use]
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Execution backend
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    /// Validate and resolve everything needed to open the stream
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`] for a bad request,
    /// [`RelayError::Unavailable`] when no backend is configured.
    pub async fn prepare(&self, request: &ChatRequest) -> Result<PreparedRelay, RelayError> {
        let validated = request.validate()?;

        if !self.backend.is_configured() {
            return Err(RelayError::Unavailable(
                "execution backend is not configured".to_string(),
            ));
        }

        let message = validated.message;

        let (category, intent) = match validated.forced_category {
            Some(forced) => (forced, None),
            None => {
                let (intent, source) = self.classifier.classify(&message).await;
                let category = match session::classify(&message, None) {
                    SessionCategory::Chat if intent == Intent::Task => SessionCategory::NewSession,
                    other => other,
                };
                (category, Some((intent, source)))
            }
        };

        let descriptor = SessionDescriptor::derive(
            &message,
            category,
            validated.session_name.as_deref(),
            self.config.backend.timestamped_session_names,
            Utc::now(),
        );

        let paraphrased = category != SessionCategory::Chat
            && !validated.suppress_paraphrase
            && self.config.paraphrase_enabled;
        let dispatched = if paraphrased {
            self.paraphrase(&message)
        } else {
            message.clone()
        };

        let envelope = RelayEnvelope::user_text(
            dispatched,
            descriptor.name.clone(),
            &self.config.backend.session_working_dir,
            descriptor.created_at,
        );

        tracing::info!(
            session = %descriptor.name,
            category = %category,
            intent = ?intent.map(|(i, _)| i),
            intent_source = ?intent.map(|(_, s)| s),
            paraphrase = paraphrased,
            "Relay prepared"
        );

        Ok(PreparedRelay {
            session: descriptor,
            intent,
            paraphrased,
            original: message,
            envelope,
        })
    }

    /// Paraphrase with fallback to the original text
    fn paraphrase(&self, message: &str) -> String {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.paraphraser.paraphrase(message))) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => message.to_string(),
            Err(_) => {
                tracing::warn!("Paraphraser panicked, dispatching original message");
                message.to_string()
            }
        }
    }

    /// Spawn the relay task and return its event receiver
    ///
    /// The task sends the status events, opens the backend stream and runs
    /// the translator. Dropping the receiver stops the task and releases the
    /// backend connection.
    #[must_use]
    pub fn start(&self, prepared: PreparedRelay) -> mpsc::Receiver<CanonicalEvent> {
        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        let backend = Arc::clone(&self.backend);
        let translator = StreamTranslator::from_settings(&self.config.backend);

        tokio::spawn(
            async move {
                let outcome = run_relay(backend.as_ref(), translator, &prepared, &tx).await;
                tracing::debug!(?outcome, session = %prepared.session.name, "Relay finished");
            }
            .in_current_span(),
        );

        rx
    }

    /// [`Relay::prepare`] followed by [`Relay::start`]
    ///
    /// # Errors
    ///
    /// Same as [`Relay::prepare`].
    pub async fn relay(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<CanonicalEvent>, RelayError> {
        let prepared = self.prepare(request).await?;
        Ok(self.start(prepared))
    }
}

async fn run_relay(
    backend: &dyn ExecutionBackend,
    translator: StreamTranslator,
    prepared: &PreparedRelay,
    tx: &mpsc::Sender<CanonicalEvent>,
) -> StreamOutcome {
    for event in prepared.status_events() {
        if tx.send(event).await.is_err() {
            return StreamOutcome::ClientGone;
        }
    }

    // the max-duration clock started with the translator, before the stream opened
    let deadline = translator.deadline();
    let opened = tokio::select! {
        biased;
        () = tx.closed() => return StreamOutcome::ClientGone,
        () = streaming::sleep_until(deadline) => {
            tracing::warn!(backend = backend.name(), "Backend did not open the stream in time");
            return translator.expire(tx).await;
        }
        opened = backend.open_stream(&prepared.envelope) => opened,
    };

    match opened {
        Ok(body) => translator.run(body, tx).await,
        Err(e) => {
            tracing::warn!(error = %e, backend = backend.name(), "Backend unavailable");
            let event = CanonicalEvent::Error {
                message: e.to_string(),
                detail: e.detail(),
                partial: None,
            };
            if tx.send(event).await.is_err() {
                return StreamOutcome::ClientGone;
            }
            StreamOutcome::Faulted
        }
    }
}
