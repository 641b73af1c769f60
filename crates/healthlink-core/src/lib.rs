//! Core types for healthlink.
//!
//! This crate provides the protocol primitives shared by the agent and any
//! collector written in Rust: the message envelope, its wire codec, the
//! per-connection instance identity and the handshake a fresh connection
//! opens with. Nothing here performs I/O.

pub mod codec;
mod envelope;
mod handshake;
mod identity;
mod kind;

pub use codec::CodecError;
pub use envelope::{ADD_EVENT, Envelope, UPGRADE};
pub use handshake::{AGENT_TYPE, EventAnnouncement, Handshake};
pub use identity::{InstanceId, InstanceIdParseError};
pub use kind::{CaptureKind, SessionKind};

use std::fmt;

/// Lifecycle phase of the agent's current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Transport is being established.
    Connecting,
    /// Handshake sent, commands are being dispatched.
    Open,
    /// Peer closed the link (close frame or end of stream).
    ClosedClean,
    /// Link dropped because of a transport error or heartbeat expiry.
    ClosedError,
    /// Waiting out the reconnect delay before the next attempt.
    Reconnecting,
    /// The agent was destroyed. Terminal.
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::ClosedClean => "closed",
            Phase::ClosedError => "closed (error)",
            Phase::Reconnecting => "reconnecting",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}
