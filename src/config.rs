// Configuration - Client settings shared by the channel, tracker and API client

use crate::sync::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3005/v1/updates";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3005";
pub const DEFAULT_TOKEN_PARAM: &str = "token";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Client configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport endpoint (`ws` or `wss`)
    pub server_url: String,
    /// Base URL of the HTTP API
    pub api_url: String,
    /// Query parameter carrying the bearer token
    pub token_query_param: String,
    pub connect_timeout_ms: u64,
    /// Per-subscriber queue depth of every event stream
    pub event_buffer: usize,
    pub countdown_tick_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_token_query_param(mut self, name: impl Into<String>) -> Self {
        self.token_query_param = name.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_millis(timeout);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick_ms = duration_millis(tick);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Get the connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the cooldown countdown interval
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = parse_url(&self.server_url)?;
        if !matches!(server.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                reason: "server_url must use ws or wss".into(),
            });
        }

        let api = parse_url(&self.api_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.api_url.clone(),
                reason: "api_url must use http or https".into(),
            });
        }

        if self.token_query_param.is_empty() {
            return Err(ConfigError::Invalid("token_query_param cannot be empty".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be > 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be > 0".into()));
        }
        if self.countdown_tick_ms == 0 {
            return Err(ConfigError::Invalid("countdown_tick_ms must be > 0".into()));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect base delay exceeds max delay".into(),
            ));
        }

        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            token_query_param: DEFAULT_TOKEN_PARAM.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            countdown_tick_ms: DEFAULT_COUNTDOWN_TICK_MS,
            reconnect: ReconnectPolicy::disabled(),
        }
    }
}

/// Whole milliseconds of a duration, saturating instead of wrapping
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
