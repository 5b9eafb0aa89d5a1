//! Daemon Server Implementation
//!
//! Builds the axum router and runs it until a shutdown signal arrives.
//! Each request runs on its own task; the only shared state is the
//! read-only [`Relay`].
//!
//! # Shutdown
//!
//! `SIGINT` / `SIGTERM` stop the listener. In-flight streams are allowed to
//! reach their terminal event before the process exits.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_core::{Relay, RelayConfig};

use crate::gateway;

/// State shared by every handler
#[derive(Clone, Debug)]
pub struct AppState {
    /// Per-process relay
    pub relay: Relay,
}

impl AppState {
    /// Build the production relay from configuration
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Relay::new(Arc::new(config)),
        }
    }

    /// Wrap an already-built relay
    #[must_use]
    pub fn from_relay(relay: Relay) -> Self {
        Self { relay }
    }
}

/// Router with every gateway route
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(gateway::health))
        .route("/api/intent", post(gateway::intent))
        .route("/api/chat/stream", post(gateway::chat_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until SIGINT / SIGTERM
///
/// # Errors
///
/// Fails if the address cannot be bound or the server loop errors.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

/// Serve on an existing listener until `shutdown` resolves
///
/// # Errors
///
/// Fails if the server loop errors.
pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(%addr, "Listening for connections");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server loop failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}
