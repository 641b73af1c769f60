//! Error types.

use std::io;
use tokio_tungstenite::tungstenite;

/// Startup configuration was rejected. No connection is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("can't start health agent, no app name provided")]
    MissingAppName,
    #[error("can't start health agent, no server url")]
    MissingServerUrl,
    #[error("can't start health agent, server url must be ws:// or wss://, got: {0}")]
    InvalidServerUrl(String),
    #[error("can't start health agent outside a Tokio runtime")]
    NoRuntime,
}

/// Failure reported by a capability provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("not supported")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

/// Why a connection attempt could not be established.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
    #[error("connection refused")]
    Refused,
    #[error("invalid request: {0}")]
    Request(String),
    #[error(transparent)]
    Transport(tungstenite::Error),
}

impl From<tungstenite::Error> for ConnectError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(ref io) if io.kind() == io::ErrorKind::ConnectionRefused => {
                ConnectError::Refused
            }
            other => ConnectError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_is_classified() {
        let err = tungstenite::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(ConnectError::from(err), ConnectError::Refused));

        let err = tungstenite::Error::Io(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(ConnectError::from(err), ConnectError::Transport(_)));
    }

    #[test]
    fn unsupported_message() {
        assert_eq!(CapabilityError::Unsupported.to_string(), "not supported");
    }
}
