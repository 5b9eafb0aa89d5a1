//! Execution Backend Integration
//!
//! Outbound streaming connection to the execution backend ("Goose").
//!
//! # Dialects
//!
//! - **web**: the backend's web server, `POST /api/chat/reply`
//! - **daemon**: the headless daemon, `POST /reply`
//!
//! With `dialect = "auto"` the dialect is probed once per relay connection.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{ExecutionBackend, GooseBackend};
//!
//! let backend = GooseBackend::new(config.backend.clone());
//! let body = backend.open_stream(&envelope).await?;
//! ```

mod goose;
mod traits;

pub use goose::GooseBackend;
pub use traits::{
    truncate_chars, BackendError, BackendStream, Dialect, ExecutionBackend, MAX_ERROR_BODY_CHARS,
};
