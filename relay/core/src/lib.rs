//! Relay Core - Streaming Chat Relay and Intent Routing for Atlas
//!
//! This crate carries a user message from a browser-facing gateway to the
//! execution backend ("Goose") and relays the backend's token stream back,
//! normalized into a small canonical event model. It has no HTTP server
//! dependency; the daemon crate wires it to axum.
//!
//! # Architecture
//!
//! ```text
//!   ChatRequest
//!       │
//!       ▼
//! ┌─────────────┐   ┌──────────────────┐
//! │   Session   │   │ Intent Classifier│  (LLM with strict timeout,
//! │    Namer    │   │                  │   heuristic fallback)
//! └──────┬──────┘   └────────┬─────────┘
//!        └─────────┬─────────┘
//!                  ▼
//!        ┌───────────────────┐
//!        │ Directive         │  (skipped for chat / when suppressed)
//!        │ Paraphraser       │
//!        └─────────┬─────────┘
//!                  ▼
//!        ┌───────────────────┐        ┌──────────────────┐
//!        │ Backend Relay     │ ─────▶ │ Execution backend│
//!        │ Client (dialect)  │ ◀───── │ (web | daemon)   │
//!        └─────────┬─────────┘  SSE   └──────────────────┘
//!                  ▼
//!        ┌───────────────────┐
//!        │ Stream Translator │  exactly one terminal event
//!        └─────────┬─────────┘
//!                  ▼
//!          mpsc::Receiver<CanonicalEvent>
//! ```
//!
//! # Key Types
//!
//! - [`Relay`]: per-request orchestrator (validate, resolve, stream)
//! - [`CanonicalEvent`]: status / token / done / error
//! - [`ChatRequest`]: inbound request body
//! - [`RelayConfig`]: immutable process-wide configuration
//! - [`ExecutionBackend`]: seam for the outbound streaming call
//!
//! # Module Overview
//!
//! - [`config`]: TOML + environment configuration loading
//! - [`session`]: session category and name derivation
//! - [`intent`]: chat vs task classification
//! - [`paraphrase`]: casual phrasing to imperative directive
//! - [`backend`]: execution backend client and dialect probing
//! - [`streaming`]: backend line decoding and terminal-event guarantee
//! - [`events`]: canonical events sent to clients
//! - [`messages`]: inbound request and outbound envelope types
//! - [`relay`]: ties everything together per request

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod events;
pub mod intent;
pub mod messages;
pub mod paraphrase;
pub mod relay;
pub mod session;
pub mod streaming;

// Re-exports for convenience
pub use backend::{BackendError, BackendStream, Dialect, ExecutionBackend, GooseBackend};
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    BackendSettings, ConfigError, ConfigOverrides, ConfigSource, DialectSetting, IntentSettings,
    RelayConfig, RelayToml,
};
pub use events::CanonicalEvent;
pub use intent::{Intent, IntentClassifier, IntentSource};
pub use messages::{ChatRequest, EnvelopeMessage, InvalidRequest, RelayEnvelope, ValidatedRequest};
pub use paraphrase::{DirectiveParaphraser, TemplateParaphraser};
pub use relay::{PreparedRelay, Relay, RelayError};
pub use session::{SessionCategory, SessionDescriptor};
pub use streaming::{BackendFrame, StreamOutcome, StreamTranslator};
