//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/atlas/relay.toml`. The result is a single immutable
//! [`RelayConfig`] that the daemon wraps in an `Arc` and hands to every
//! request; nothing re-reads the environment after startup.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [backend]
//! base_url = "http://127.0.0.1:3000"
//! secret_key = "local-dev"
//! dialect = "auto"            # auto | web | daemon
//! probe_timeout_ms = 3000
//! stream_timeout_secs = 90    # 0 disables the idle timeout
//! max_stream_duration_secs = 600
//! timestamped_session_names = true
//!
//! [intent]
//! base_url = "http://127.0.0.1:11434/v1"
//! model = "gpt-4o-mini"
//! timeout_ms = 800
//!
//! [paraphrase]
//! enabled = true
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Dialect Selection
// =============================================================================

/// Which backend dialect to talk, or whether to probe for it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectSetting {
    /// Probe `GET {base}/api/health` once per relay connection
    #[default]
    Auto,
    /// Always use the web dialect (`/api/chat/reply`)
    Web,
    /// Always use the daemon dialect (`/reply`)
    Daemon,
}

impl DialectSetting {
    /// Lowercase name as used in config files and `/health`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Web => "web",
            Self::Daemon => "daemon",
        }
    }
}

impl std::fmt::Display for DialectSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "web" => Ok(Self::Web),
            "daemon" => Ok(Self::Daemon),
            other => Err(ConfigError::ValidationError(format!(
                "unknown backend dialect '{other}' (expected auto, web or daemon)"
            ))),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, e.g. `127.0.0.1:8080`
    pub bind: Option<String>,
}

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Execution backend base URL
    pub base_url: Option<String>,

    /// Shared secret sent as `X-Secret-Key` (and bearer token when non-empty)
    pub secret_key: Option<String>,

    /// `auto`, `web` or `daemon`
    pub dialect: Option<String>,

    /// Dialect probe timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,

    /// Idle timeout in seconds (0 = no timeout)
    pub stream_timeout_secs: Option<u64>,

    /// Hard cap on one relay connection in seconds (0 = no cap)
    pub max_stream_duration_secs: Option<u64>,

    /// Working directory reported to the backend
    pub session_working_dir: Option<PathBuf>,

    /// Append a unix-seconds suffix to derived session names
    pub timestamped_session_names: Option<bool>,
}

/// Intent classifier section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentToml {
    /// OpenAI-compatible base URL (unset = heuristic only)
    pub base_url: Option<String>,

    /// Model name sent to the classifier
    pub model: Option<String>,

    /// Bearer token for the classifier
    pub api_key: Option<String>,

    /// Classification timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Paraphrase section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParaphraseToml {
    /// Process-wide paraphrase toggle
    pub enabled: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Backend configuration section
    pub backend: BackendToml,

    /// Intent classifier configuration section
    pub intent: IntentToml,

    /// Paraphrase configuration section
    pub paraphrase: ParaphraseToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Default execution backend base URL
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000";

/// Default classifier model
pub const DEFAULT_INTENT_MODEL: &str = "gpt-4o-mini";

/// Lowest accepted classifier timeout
pub const MIN_INTENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Execution backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSettings {
    /// Base URL without trailing slash. Empty means "not configured".
    pub base_url: String,

    /// Shared secret
    pub secret_key: String,

    /// Dialect selection
    pub dialect: DialectSetting,

    /// Dialect probe timeout
    pub probe_timeout: Duration,

    /// Idle timeout for the response head and between body chunks
    pub stream_timeout: Option<Duration>,

    /// Hard cap for one relay connection
    pub max_stream_duration: Option<Duration>,

    /// Working directory reported to the backend in every envelope
    pub session_working_dir: PathBuf,

    /// Whether derived session names get a `_<unix secs>` suffix
    pub timestamped_session_names: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            secret_key: String::new(),
            dialect: DialectSetting::Auto,
            probe_timeout: Duration::from_millis(3000),
            stream_timeout: Some(Duration::from_secs(90)),
            max_stream_duration: Some(Duration::from_secs(600)),
            session_working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timestamped_session_names: true,
        }
    }
}

impl BackendSettings {
    /// Whether a backend base URL is present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

/// Intent classifier settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentSettings {
    /// OpenAI-compatible base URL; `None` disables the LLM path
    pub base_url: Option<String>,

    /// Model name
    pub model: String,

    /// Bearer token (empty = none)
    pub api_key: String,

    /// Strict per-classification timeout
    pub timeout: Duration,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: DEFAULT_INTENT_MODEL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_millis(800),
        }
    }
}

/// Centralized configuration for the relay
///
/// Consolidates configuration from every source. Use [`load_config`] to load
/// with proper priority handling, then [`ConfigOverrides::apply`] for CLI flags.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listen address for the gateway
    pub bind: String,

    /// Execution backend settings
    pub backend: BackendSettings,

    /// Intent classifier settings
    pub intent: IntentSettings,

    /// Process-wide paraphrase toggle
    pub paraphrase_enabled: bool,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            backend: BackendSettings::default(),
            intent: IntentSettings::default(),
            paraphrase_enabled: true,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Whether the LLM classifier is configured
    #[must_use]
    pub fn intent_llm_enabled(&self) -> bool {
        self.intent.base_url.is_some()
    }
}

// =============================================================================
// Value Parsing
// =============================================================================

/// Parse a boolean flag the way the relay's env vars and request fields do
///
/// Accepts `1/true/yes/on` and `0/false/no/off` (case-insensitive).
#[must_use]
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a stream timeout in seconds
///
/// Returns `Some(None)` for the "disabled" spellings, `Some(Some(d))` for a
/// positive number of seconds (fractions allowed), `None` if unparseable.
#[must_use]
pub fn parse_timeout_secs(value: &str) -> Option<Option<Duration>> {
    let value = value.trim().to_lowercase();
    if matches!(value.as_str(), "0" | "none" | "off" | "infinite") {
        return Some(None);
    }
    let secs = value.parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    if secs == 0.0 {
        return Some(None);
    }
    Some(Some(Duration::from_secs_f64(secs)))
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn clamp_intent_timeout(timeout: Duration) -> Duration {
    if timeout < MIN_INTENT_TIMEOUT {
        tracing::warn!(
            requested = ?timeout,
            "Intent timeout below minimum, clamping to 100ms"
        );
        MIN_INTENT_TIMEOUT
    } else {
        timeout
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/atlas/relay.toml` or
/// `~/.config/atlas/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("atlas").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if it names an unknown dialect.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(ref bind) = toml.server.bind {
        if bind.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.bind must not be empty".to_string(),
            ));
        }
        config.bind = bind.trim().to_string();
    }

    // Backend settings
    if let Some(ref url) = toml.backend.base_url {
        config.backend.base_url = normalize_base_url(url);
    }
    if let Some(ref secret) = toml.backend.secret_key {
        config.backend.secret_key = secret.clone();
    }
    if let Some(ref dialect) = toml.backend.dialect {
        config.backend.dialect = dialect.parse()?;
    }
    if let Some(ms) = toml.backend.probe_timeout_ms {
        config.backend.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.backend.stream_timeout_secs {
        config.backend.stream_timeout = secs_or_none(secs);
    }
    if let Some(secs) = toml.backend.max_stream_duration_secs {
        config.backend.max_stream_duration = secs_or_none(secs);
    }
    if let Some(ref dir) = toml.backend.session_working_dir {
        config.backend.session_working_dir = dir.clone();
    }
    if let Some(enabled) = toml.backend.timestamped_session_names {
        config.backend.timestamped_session_names = enabled;
    }

    // Intent settings
    if let Some(ref url) = toml.intent.base_url {
        let url = normalize_base_url(url);
        config.intent.base_url = (!url.is_empty()).then_some(url);
    }
    if let Some(ref model) = toml.intent.model {
        config.intent.model = model.clone();
    }
    if let Some(ref key) = toml.intent.api_key {
        config.intent.api_key = key.clone();
    }
    if let Some(ms) = toml.intent.timeout_ms {
        config.intent.timeout = clamp_intent_timeout(Duration::from_millis(ms));
    }

    if let Some(enabled) = toml.paraphrase.enabled {
        config.paraphrase_enabled = enabled;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparseable values are logged and ignored; the previous layer stays.
fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let ignored = |key: &str, value: &str| {
        tracing::warn!(key, value, "Ignoring unparseable environment value");
    };

    if let Some(bind) = env("ATLAS_RELAY_BIND") {
        if bind.trim().is_empty() {
            ignored("ATLAS_RELAY_BIND", &bind);
        } else {
            config.bind = bind.trim().to_string();
            config.source = ConfigSource::Env;
        }
    }

    // Backend settings from environment
    if let Some(url) = env("GOOSE_BASE_URL") {
        config.backend.base_url = normalize_base_url(&url);
        config.source = ConfigSource::Env;
    }
    if let Some(secret) = env("GOOSE_SECRET_KEY") {
        config.backend.secret_key = secret;
        config.source = ConfigSource::Env;
    }
    if let Some(dialect) = env("GOOSE_DIALECT") {
        match dialect.parse::<DialectSetting>() {
            Ok(d) => {
                config.backend.dialect = d;
                config.source = ConfigSource::Env;
            }
            Err(_) => ignored("GOOSE_DIALECT", &dialect),
        }
    }
    if let Some(ms) = env("GOOSE_PROBE_TIMEOUT_MS") {
        match ms.trim().parse::<u64>() {
            Ok(ms) => {
                config.backend.probe_timeout = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => ignored("GOOSE_PROBE_TIMEOUT_MS", &ms),
        }
    }
    // The longer spelling wins when both are set
    for key in ["ATLAS_STREAM_TIMEOUT", "ATLAS_STREAM_TIMEOUT_SECONDS"] {
        if let Some(value) = env(key) {
            match parse_timeout_secs(&value) {
                Some(timeout) => {
                    config.backend.stream_timeout = timeout;
                    config.source = ConfigSource::Env;
                }
                None => ignored(key, &value),
            }
        }
    }
    if let Some(value) = env("ATLAS_STREAM_MAX_DURATION") {
        match parse_timeout_secs(&value) {
            Some(cap) => {
                config.backend.max_stream_duration = cap;
                config.source = ConfigSource::Env;
            }
            None => ignored("ATLAS_STREAM_MAX_DURATION", &value),
        }
    }
    if let Some(dir) = env("ATLAS_SESSION_WORKING_DIR") {
        if !dir.trim().is_empty() {
            config.backend.session_working_dir = PathBuf::from(dir.trim());
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("ATLAS_TIMESTAMPED_SESSIONS") {
        match parse_flag(&value) {
            Some(enabled) => {
                config.backend.timestamped_session_names = enabled;
                config.source = ConfigSource::Env;
            }
            None => ignored("ATLAS_TIMESTAMPED_SESSIONS", &value),
        }
    }

    // Intent settings from environment
    if let Some(url) = env("INTENT_LLM_BASE") {
        let url = normalize_base_url(&url);
        config.intent.base_url = (!url.is_empty()).then_some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("INTENT_LLM_MODEL") {
        if !model.trim().is_empty() {
            config.intent.model = model.trim().to_string();
            config.source = ConfigSource::Env;
        }
    }
    if let Some(key) = env("INTENT_LLM_API_KEY") {
        config.intent.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("INTENT_LLM_TIMEOUT_MS") {
        match ms.trim().parse::<u64>() {
            Ok(ms) => {
                config.intent.timeout = clamp_intent_timeout(Duration::from_millis(ms));
                config.source = ConfigSource::Env;
            }
            Err(_) => ignored("INTENT_LLM_TIMEOUT_MS", &ms),
        }
    }

    if let Some(value) = env("ATLAS_PARAPHRASE") {
        match parse_flag(&value) {
            Some(enabled) => {
                config.paraphrase_enabled = enabled;
                config.source = ConfigSource::Env;
            }
            None => ignored("ATLAS_PARAPHRASE", &value),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind: Option<String>,

    /// Backend base URL override
    pub backend_url: Option<String>,

    /// Dialect override
    pub dialect: Option<DialectSetting>,

    /// Idle timeout override (seconds, 0 = none)
    pub stream_timeout_secs: Option<u64>,

    /// Classifier base URL override
    pub intent_base_url: Option<String>,

    /// Paraphrase toggle override
    pub paraphrase_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind(mut self, bind: String) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set backend URL override
    #[must_use]
    pub fn with_backend_url(mut self, url: String) -> Self {
        self.backend_url = Some(url);
        self
    }

    /// Set dialect override
    #[must_use]
    pub fn with_dialect(mut self, dialect: DialectSetting) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_stream_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_timeout_secs = Some(secs);
        self
    }

    /// Set classifier URL override
    #[must_use]
    pub fn with_intent_base_url(mut self, url: String) -> Self {
        self.intent_base_url = Some(url);
        self
    }

    /// Set paraphrase toggle override
    #[must_use]
    pub fn with_paraphrase_enabled(mut self, enabled: bool) -> Self {
        self.paraphrase_enabled = Some(enabled);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bind.is_none()
            && self.backend_url.is_none()
            && self.dialect.is_none()
            && self.stream_timeout_secs.is_none()
            && self.intent_base_url.is_none()
            && self.paraphrase_enabled.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref bind) = self.bind {
            config.bind = bind.clone();
        }

        if let Some(ref url) = self.backend_url {
            config.backend.base_url = normalize_base_url(url);
        }

        if let Some(dialect) = self.dialect {
            config.backend.dialect = dialect;
        }

        if let Some(secs) = self.stream_timeout_secs {
            config.backend.stream_timeout = secs_or_none(secs);
        }

        if let Some(ref url) = self.intent_base_url {
            let url = normalize_base_url(url);
            config.intent.base_url = (!url.is_empty()).then_some(url);
        }

        if let Some(enabled) = self.paraphrase_enabled {
            config.paraphrase_enabled = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
