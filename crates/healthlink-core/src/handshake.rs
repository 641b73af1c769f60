//! Handshake and registration envelopes.

use crate::{ADD_EVENT, Envelope, InstanceId, UPGRADE};
use serde::{Deserialize, Serialize};

/// Agent type reported in every handshake.
pub const AGENT_TYPE: &str = "healthlink-rust";

/// Identification sent as the first message of an open connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Application the agent monitors.
    pub app_name: String,
    /// Identity of this connection attempt.
    pub instance_id: InstanceId,
    /// Agent implementation.
    pub agent_type: String,
    /// Agent version.
    pub agent_version: String,
    /// Host platform, `<os>-<arch>`.
    pub platform: String,
    /// Deployment environment tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Custom events registered before the connection opened.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl Handshake {
    /// Handshake for this build of the agent.
    pub fn new(app_name: impl Into<String>, instance_id: InstanceId) -> Self {
        Self {
            app_name: app_name.into(),
            instance_id,
            agent_type: AGENT_TYPE.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            env: None,
            events: Vec::new(),
        }
    }

    /// Set the environment tag.
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// List events registered ahead of the handshake.
    pub fn with_events(mut self, events: Vec<String>) -> Self {
        self.events = events;
        self
    }

    /// Wrap into the `upgrade` envelope.
    pub fn into_envelope(self) -> Envelope {
        let data = serde_json::to_value(self).unwrap_or_default();
        Envelope::new(UPGRADE).with_data(data)
    }
}

/// Notice that a custom event was registered on a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAnnouncement {
    /// The registered event name.
    pub event: String,
}

impl EventAnnouncement {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
        }
    }

    /// Wrap into the `addEvent` envelope.
    pub fn into_envelope(self) -> Envelope {
        let data = serde_json::to_value(self).unwrap_or_default();
        Envelope::new(ADD_EVENT).with_data(data)
    }
}
