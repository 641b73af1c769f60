//! Per-connection instance identity.
//!
//! Format: `hostname_unique`, where `unique` is regenerated on every
//! connection attempt so a collector can tell reconnect churn apart from a
//! stable host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity presented by one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId {
    host: String,
    unique: String,
}

impl InstanceId {
    /// Create an identity from its parts.
    pub fn new(host: impl Into<String>, unique: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            unique: unique.into(),
        }
    }

    /// A fresh identity for this host.
    pub fn generate() -> Self {
        let host = gethostname::gethostname().to_string_lossy().to_string();
        Self::new(host, uuid::Uuid::new_v4().simple().to_string())
    }

    /// The host name part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The generated part.
    pub fn unique(&self) -> &str {
        &self.unique
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.host, self.unique)
    }
}

impl FromStr for InstanceId {
    type Err = InstanceIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Host names may contain underscores; the generated part never does.
        let (host, unique) = s
            .rsplit_once('_')
            .ok_or_else(|| InstanceIdParseError::MissingSeparator(s.to_string()))?;

        if unique.is_empty() {
            return Err(InstanceIdParseError::EmptyUnique);
        }

        Ok(Self::new(host, unique))
    }
}

impl TryFrom<String> for InstanceId {
    type Error = InstanceIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.to_string()
    }
}

/// Error parsing an instance identity string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstanceIdParseError {
    #[error("instance id must contain '_' separator, got: {0}")]
    MissingSeparator(String),
    #[error("instance id unique part cannot be empty")]
    EmptyUnique,
}
