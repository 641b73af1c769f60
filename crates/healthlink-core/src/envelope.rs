//! The message envelope.
//!
//! Every exchange in either direction is an envelope: `name` selects the
//! handler, `config` carries caller parameters and `data` carries results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the handshake envelope sent first on every open connection.
pub const UPGRADE: &str = "upgrade";

/// Name of the envelope announcing an event registered after the handshake.
pub const ADD_EVENT: &str = "addEvent";

/// A structured unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name used for handler lookup.
    pub name: String,
    /// Caller-supplied parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Handler results, set on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// An envelope carrying only an event name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            data: None,
        }
    }

    /// Attach caller parameters.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Attach a result payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Look up a single field of `config`.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.as_ref().and_then(|c| c.get(key))
    }
}
