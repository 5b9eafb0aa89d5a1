//! Relay Daemon - SSE Gateway for the Atlas Chat Relay
//!
//! Entry point for the browser-facing relay. Loads configuration, checks the
//! execution backend once, and serves the gateway until signalled.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config file + environment)
//! relay-daemon
//!
//! # Custom listen address and backend
//! relay-daemon --bind 0.0.0.0:8080 --backend-url http://127.0.0.1:3000
//!
//! # With config file
//! relay-daemon --config /etc/atlas/relay.toml
//!
//! # JSON logs, verbose
//! RUST_LOG=debug relay-daemon --log-json
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use relay_core::{load_config_from_path, ConfigOverrides, DialectSetting};
use relay_daemon::{serve, AppState};

/// Relay Daemon - streaming chat relay with intent routing
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ATLAS_RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Execution backend base URL
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Backend dialect (auto, web, daemon)
    #[arg(long, value_name = "DIALECT")]
    dialect: Option<DialectSetting>,

    /// Idle timeout for the backend stream in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    stream_timeout_secs: Option<u64>,

    /// OpenAI-compatible base URL for the intent classifier
    #[arg(long, value_name = "URL")]
    intent_base_url: Option<String>,

    /// Never paraphrase messages
    #[arg(long)]
    no_paraphrase: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ATLAS_RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref bind) = self.bind {
            overrides = overrides.with_bind(bind.clone());
        }
        if let Some(ref url) = self.backend_url {
            overrides = overrides.with_backend_url(url.clone());
        }
        if let Some(dialect) = self.dialect {
            overrides = overrides.with_dialect(dialect);
        }
        if let Some(secs) = self.stream_timeout_secs {
            overrides = overrides.with_stream_timeout_secs(secs);
        }
        if let Some(ref url) = self.intent_base_url {
            overrides = overrides.with_intent_base_url(url.clone());
        }
        if self.no_paraphrase {
            overrides = overrides.with_paraphrase_enabled(false);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.log_json);

    info!("Relay daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);

    if let Some(ref path) = config.config_file_path {
        info!(config_path = ?path, "Config file");
    }
    info!(
        bind = %config.bind,
        backend = %config.backend.base_url,
        dialect = %config.backend.dialect,
        intent_llm = config.intent_llm_enabled(),
        paraphrase = config.paraphrase_enabled,
        source = %config.source(),
        "Configuration loaded"
    );

    let bind = config.bind.clone();
    let state = AppState::new(config);

    let backend = state.relay.backend();
    if !backend.is_configured() {
        warn!("No execution backend configured, chat requests will be answered with 503");
    } else if backend.health_check().await {
        info!(backend = backend.name(), "Execution backend reachable");
    } else {
        warn!(backend = backend.name(), "Execution backend not reachable yet");
    }

    match serve(state, &bind).await {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay daemon stopped with error");
            Err(e)
        }
    }
}
