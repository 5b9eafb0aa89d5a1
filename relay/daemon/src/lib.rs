//! Relay Daemon - SSE Gateway for the Atlas Chat Relay
//!
//! The HTTP surface over [`relay_core`]. Browsers post a chat message and
//! receive the relay's canonical events as `text/event-stream` frames.
//!
//! # Endpoints
//!
//! | Method | Path               | Response                              |
//! |--------|--------------------|---------------------------------------|
//! | GET    | `/health`          | JSON status of the relay              |
//! | POST   | `/api/intent`      | `{intent, source}` for `{text}`       |
//! | POST   | `/api/chat/stream` | `text/event-stream` of canonical events |
//!
//! Every route answers CORS preflights permissively.

pub mod gateway;
pub mod server;

pub use gateway::GatewayError;
pub use server::{router, serve, serve_with_shutdown, AppState};
