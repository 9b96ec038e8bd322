//! Application configuration, loaded from the environment.

use std::env;
use std::time::Duration;

use tracing::Level;
use voicelink_core::AutoSendConfig;

/// Bytes per captured audio chunk handed to the socket.
pub const DEFAULT_CHUNK_BYTES: usize = 960;
/// Pause between captured chunks.
pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 20;
pub const DEFAULT_ORCHESTRATOR_URL: &str = "http://localhost:8998";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: Option<String>,
    pub orchestrator_url: String,
    pub auto_send: AutoSendConfig,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `VOICELINK_SERVER_URL`: (Optional) Base websocket URL of the speech server.
    // *   `VOICELINK_ORCHESTRATOR_URL`: (Optional) Base HTTP URL of the orchestrator. Defaults to "http://localhost:8998".
    // *   `VOICELINK_SILENCE_MS`: (Optional) Silence before unsent text is dispatched. Defaults to 1500.
    // *   `VOICELINK_MIN_WORDS`: (Optional) Words needed before a dispatch. Defaults to 3.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_url = lookup("VOICELINK_SERVER_URL").filter(|url| !url.trim().is_empty());
        let orchestrator_url = lookup("VOICELINK_ORCHESTRATOR_URL")
            .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_URL.to_string());

        let mut auto_send = AutoSendConfig::default();
        if let Some(ms) = parse_var(&lookup, "VOICELINK_SILENCE_MS")? {
            auto_send.silence_threshold = Duration::from_millis(ms);
        }
        if let Some(words) = parse_var(&lookup, "VOICELINK_MIN_WORDS")? {
            auto_send.min_words = words;
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            server_url,
            orchestrator_url,
            auto_send,
            log_level,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}
