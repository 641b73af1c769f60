//! Persistent-connection diagnostics agent.
//!
//! The agent keeps a WebSocket link to a collector alive across network
//! failures and executes commands the collector sends over it:
//!
//! ```no_run
//! use healthlink_client::{Agent, AgentConfig, EventContext, Outcome};
//!
//! # async fn run() -> Result<(), healthlink_client::ConfigError> {
//! let agent = Agent::start(AgentConfig::new("billing", "ws://collector:3000"), None)?;
//! agent.add_event("flush_cache", |ctx: EventContext| async move {
//!     let _ = ctx.reply(&ctx.envelope);
//!     Outcome::Ok
//! });
//! // ...
//! agent.destroy().await;
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod capability;
pub mod config;
mod connection;
pub mod error;
pub mod handlers;
pub mod heartbeat;
mod link;
pub mod pending;
pub mod registry;
pub mod session;

pub use agent::{Agent, Lifecycle};
pub use capability::{Capabilities, CapabilityProvider, Outcome};
pub use config::AgentConfig;
pub use connection::{CloseReason, Connection};
pub use error::{CapabilityError, ConfigError};
pub use link::Link;
pub use registry::{EventContext, EventRegistry, Handler};
pub use session::SessionGuard;

pub use healthlink_core::{CaptureKind, Envelope, InstanceId, Phase, SessionKind};
