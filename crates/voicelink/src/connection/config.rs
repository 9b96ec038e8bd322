use std::time::Duration;

use voicelink_protocol::message::{DEFAULT_MODEL, DEFAULT_VERSION};

use crate::connection::consts::{
    BASE_RECONNECT_DELAY_MS, BASE_URL, DEFAULT_CAPACITY, MAX_RECONNECT_ATTEMPTS,
    MAX_RECONNECT_DELAY_MS, SOCKET_PATH,
};

/// Exponential reconnect backoff: `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            cap: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    path: String,
    version: String,
    model: String,
    capacity: usize,
    backoff: BackoffPolicy,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.config.version = version.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    // Sets the default values.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            path: SOCKET_PATH.to_string(),
            version: DEFAULT_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            capacity: DEFAULT_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full socket URL, e.g. `ws://localhost:8998/api/chat`.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
