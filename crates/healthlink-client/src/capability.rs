//! Capability provider interface.
//!
//! Profilers, snapshotters and report generators live outside the agent.
//! The agent reaches them only through [`CapabilityProvider`]; when none is
//! attached every command degrades to a warning and a failure code.

use std::sync::Arc;

use async_trait::async_trait;
use healthlink_core::{CaptureKind, SessionKind};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::CapabilityError;

/// External diagnostics facility driven by remote commands.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Begin a session of `kind`.
    async fn start(&self, kind: SessionKind) -> Result<(), CapabilityError>;

    /// End a session of `kind` and return what it captured.
    async fn stop(&self, kind: SessionKind) -> Result<Value, CapabilityError>;

    /// Take a one-shot capture.
    async fn capture(&self, kind: CaptureKind) -> Result<Value, CapabilityError>;

    /// Free provider resources. Called once when the agent is destroyed.
    async fn release(&self) {}
}

/// Result of handling one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Handled, nothing to report.
    Ok,
    /// Handled, carrying the captured result.
    Captured(Value),
    /// Not configured, not running, or the provider failed.
    Failed,
}

impl Outcome {
    /// Numeric status: `0` on success, `1` on failure.
    pub fn code(&self) -> u8 {
        match self {
            Outcome::Ok | Outcome::Captured(_) => 0,
            Outcome::Failed => 1,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }
}

/// Shared slot holding the optional provider.
///
/// Cloned into every component that needs the provider; emptied by destroy.
#[derive(Clone, Default)]
pub struct Capabilities {
    slot: Arc<Mutex<Option<Arc<dyn CapabilityProvider>>>>,
}

impl Capabilities {
    pub fn new(provider: Option<Arc<dyn CapabilityProvider>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(provider)),
        }
    }

    /// The attached provider, if any.
    pub fn get(&self) -> Option<Arc<dyn CapabilityProvider>> {
        self.slot.lock().clone()
    }

    /// Detach the provider.
    pub fn take(&self) -> Option<Arc<dyn CapabilityProvider>> {
        self.slot.lock().take()
    }

    pub fn is_configured(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Null;

    #[async_trait]
    impl CapabilityProvider for Null {
        async fn start(&self, _kind: SessionKind) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn stop(&self, _kind: SessionKind) -> Result<Value, CapabilityError> {
            Ok(Value::Null)
        }
        async fn capture(&self, _kind: CaptureKind) -> Result<Value, CapabilityError> {
            Err(CapabilityError::Unsupported)
        }
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(Outcome::Ok.code(), 0);
        assert_eq!(Outcome::Captured(json!({"a": 1})).code(), 0);
        assert_eq!(Outcome::Failed.code(), 1);
    }

    #[test]
    fn take_empties_every_clone() {
        let caps = Capabilities::new(Some(Arc::new(Null)));
        let other = caps.clone();
        assert!(other.is_configured());
        assert!(caps.take().is_some());
        assert!(other.get().is_none());
        assert!(caps.take().is_none());
    }
}
