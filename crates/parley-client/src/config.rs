//! Client configuration.

use crate::ReconnectPolicy;
use parley_core::ConversationContext;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for a [`ChatSession`](crate::ChatSession).
///
/// ```toml
/// url = "ws://127.0.0.1:8000"
///
/// [reconnect]
/// max_attempts = 5
/// base_delay_ms = 1000
/// max_delay_ms = 30000
///
/// [context]
/// title = "Solar-powered coffee carts"
/// abstract = "A mobile espresso business for festivals"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the backend.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Sent with every message; the backend uses it as conversation context.
    pub context: ConversationContext,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000".to_string(),
            reconnect: ReconnectPolicy::default(),
            context: ConversationContext::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "url must start with ws:// or wss://, got: {}",
                self.url
            )));
        }
        let policy = &self.reconnect;
        if policy.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.max_attempts must be at least 1".into(),
            ));
        }
        if policy.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms must be at least 1".into(),
            ));
        }
        if policy.max_delay_ms < policy.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms cannot be below base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Error loading a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
