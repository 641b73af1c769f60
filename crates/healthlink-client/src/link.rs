//! The "current connection" slot.

use std::sync::Arc;

use healthlink_core::Envelope;
use parking_lot::Mutex;

use crate::connection::Connection;

/// Handle to whichever connection is current.
///
/// The manager is the only writer; everything else reads through it so a
/// reply always goes to the live transport, never to a superseded one.
#[derive(Clone, Default)]
pub struct Link {
    current: Arc<Mutex<Option<Arc<Connection>>>>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current connection, if one has been created.
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.current.lock().clone()
    }

    /// Install `connection` as current, returning the one it supersedes.
    pub(crate) fn replace(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.current.lock().replace(connection)
    }

    /// Send on the current connection. `false` if there is none or it is not open.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match self.current() {
            Some(connection) => connection.send(envelope),
            None => false,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current();
        f.debug_struct("Link")
            .field("attempt", &current.as_ref().map(|c| c.attempt()))
            .field("phase", &current.as_ref().map(|c| c.phase()))
            .finish()
    }
}
