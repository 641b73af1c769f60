//! Agent startup configuration.

use crate::error::ConfigError;
use healthlink_core::InstanceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default heartbeat deadline: the collector pings every 30s, plus latency margin.
pub const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_millis(31_000);

/// Default pause between a closed connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);

/// Startup parameters for an [`Agent`](crate::Agent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Application name reported to the collector. Required.
    pub app_name: String,
    /// Collector base address, `ws://` or `wss://`. Required.
    pub server_url: String,
    /// Optional auth token, sent as the `token` header on upgrade.
    pub token: Option<String>,
    /// How long the link may stay silent before it is terminated.
    #[serde(rename = "heartbeat_delay_ms", with = "millis")]
    pub heartbeat_delay: Duration,
    /// Fixed delay before each reconnect attempt.
    #[serde(rename = "auto_reconnect_delay_ms", with = "millis")]
    pub auto_reconnect_delay: Duration,
    /// Environment tag included in the handshake.
    pub environment: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            server_url: String::new(),
            token: None,
            heartbeat_delay: DEFAULT_HEARTBEAT_DELAY,
            auto_reconnect_delay: DEFAULT_RECONNECT_DELAY,
            environment: None,
        }
    }
}

impl AgentConfig {
    pub fn new(app_name: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_heartbeat_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = delay;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.auto_reconnect_delay = delay;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Check the required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::MissingAppName);
        }
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidServerUrl(self.server_url.clone()));
        }
        Ok(())
    }

    /// Address of the collector endpoint for one connection attempt.
    pub fn endpoint(&self, instance: &InstanceId) -> String {
        format!(
            "{}/{}/{}",
            self.server_url.trim_end_matches('/'),
            instance,
            self.app_name
        )
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
